//! Defines routes for the media gateway.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /api/media/upload`         — multipart form upload
//!   - `POST /api/media/upload-stream`  — raw streamed body (large files)
//!   - `POST /api/media/upload-base64`  — JSON base64 last resort
//!   - `POST /api/upload`               — legacy raw body with `x-file-name`
//!
//! - **Object endpoints**
//!   - `GET    /api/media`         — list the caller's records
//!   - `GET    /api/media/{*key}`  — stream a blob (HEAD probes too)
//!   - `POST   /api/media/{*key}`  — moderation status update (admin)
//!   - `DELETE /api/media/{*key}`  — delete blob and record
//!
//! - **Admin / operational**
//!   - `POST /api/admin/reconcile` — trigger a drift sweep
//!   - `GET  /healthz`, `GET /readyz`
//!
//! The wildcard `{*key}` carries owner-prefixed keys like
//! `u1/1700000000000-ab12-photo.png`. CORS preflights are answered
//! unconditionally by the `CorsLayer`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        media_handlers::{
            delete_media, list_media, set_status, stream_media, trigger_reconcile,
            upload_base64, upload_multipart, upload_raw,
        },
    },
    services::{identity::IdentityVerifier, media_service::MediaService},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, Method, header},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

/// Uploads larger than this are rejected at the transport layer.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state carried by every handler.
#[derive(Clone)]
pub struct AppState {
    pub media: MediaService,
    pub identity: IdentityVerifier,
    pub admin_email: String,
}

/// Build and return the router for all gateway routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-file-name"),
        ]);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload entry points
        .route("/api/media/upload", post(upload_multipart))
        .route("/api/media/upload-stream", post(upload_raw))
        .route("/api/media/upload-base64", post(upload_base64))
        .route("/api/upload", post(upload_raw))
        // listing + object routes
        .route("/api/media", get(list_media))
        .route(
            "/api/media/{*key}",
            get(stream_media).post(set_status).delete(delete_media),
        )
        // admin
        .route("/api/admin/reconcile", post(trigger_reconcile))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
