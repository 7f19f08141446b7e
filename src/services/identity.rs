//! Identity verifier — resolves bearer tokens into principals.
//!
//! Wraps the single capability the gateway needs from the external identity
//! provider: given a token, answer `{id, email}` or fail. There are no
//! retries here; a token is either valid now or the caller must
//! re-authenticate. Authorization is re-verified on every request, never
//! cached across requests.

use crate::{errors::GatewayError, models::principal::Principal};
use serde::Deserialize;
use std::time::Duration;

/// Response shape of the provider's "who is this" endpoint. Extra fields in
/// the provider payload are ignored.
#[derive(Debug, Deserialize)]
struct WhoAmI {
    id: String,
    email: String,
}

#[derive(Clone)]
pub struct IdentityVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl IdentityVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a bearer token to a verified principal.
    ///
    /// An empty token fails without a network call. A non-success response
    /// or transport error is `Unauthorized`; backend detail is logged, not
    /// surfaced.
    pub async fn verify(&self, token: &str) -> Result<Principal, GatewayError> {
        if token.trim().is_empty() {
            return Err(GatewayError::Unauthorized);
        }

        let url = format!("{}/api/auth/me", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!("identity provider unreachable: {}", err);
                GatewayError::Unauthorized
            })?;

        if !response.status().is_success() {
            tracing::debug!("identity provider rejected token: {}", response.status());
            return Err(GatewayError::Unauthorized);
        }

        let who: WhoAmI = response.json().await.map_err(|err| {
            tracing::warn!("identity provider returned malformed payload: {}", err);
            GatewayError::Unauthorized
        })?;

        Ok(Principal {
            id: who.id,
            email: who.email,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
