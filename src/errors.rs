//! Gateway error taxonomy and HTTP shaping.
//!
//! Every internal failure is converted to exactly one taxonomy kind before it
//! crosses the HTTP boundary. Backend error text never reaches the client;
//! it is logged and replaced with an opaque diagnostic.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// The complete set of failures the gateway reports to callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing, malformed, or expired bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid caller, but the operation is not permitted for them.
    #[error("forbidden")]
    Forbidden,

    /// The key does not resolve to a servable object for this caller.
    #[error("not found")]
    NotFound,

    /// The request itself is unacceptable: empty body, size bounds,
    /// disallowed content type, malformed key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blob-store or index call failed. The underlying cause is logged,
    /// not returned.
    #[error("storage unavailable")]
    StorageUnavailable,
}

impl GatewayError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        GatewayError::InvalidArgument(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
