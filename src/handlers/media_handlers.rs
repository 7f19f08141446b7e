//! HTTP handlers for the media gateway.
//!
//! Every operation resolves the bearer token through the identity verifier
//! first. Bodies are streamed in and out; nothing buffers a whole object in
//! memory except the multipart and base64 entry points, whose payloads are
//! bounded by the upload size limit.

use crate::{
    errors::GatewayError,
    models::{
        media::{MediaRecord, MediaStatus},
        principal::Principal,
    },
    policy,
    routes::routes::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;

/// Resolve the caller, accepting the token from the `Authorization` header
/// or, where permitted, a `?token=` query parameter.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Principal, GatewayError> {
    let token = crate::services::identity::bearer_token(headers)
        .or_else(|| query_token.map(str::to_string))
        .ok_or(GatewayError::Unauthorized)?;
    state.identity.verify(&token).await
}

/// Authorization gate shared by stream and delete. Non-owners get
/// `NotFound` rather than `Forbidden` so key existence never leaks through
/// the error kind.
fn check_access(state: &AppState, principal: &Principal, key: &str) -> Result<(), GatewayError> {
    policy::ensure_key_safe(key).map_err(GatewayError::InvalidArgument)?;
    if policy::may_access(principal, key, &state.admin_email) {
        Ok(())
    } else {
        Err(GatewayError::NotFound)
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub key: String,
}

/// `POST /api/media/upload` — multipart form upload (`file`, `fileName`,
/// `fileType`).
pub async fn upload_multipart(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;

    let mut file_bytes = None;
    let mut file_name = None;
    let mut file_type = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        GatewayError::invalid(format!("malformed multipart body: {}", err))
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                if file_name.is_none() {
                    file_name = field.file_name().map(str::to_string);
                }
                if file_type.is_none() {
                    file_type = field.content_type().map(str::to_string);
                }
                let bytes = field.bytes().await.map_err(|err| {
                    GatewayError::invalid(format!("failed reading file field: {}", err))
                })?;
                file_bytes = Some(bytes);
            }
            Some("fileName") => {
                if let Ok(value) = field.text().await {
                    file_name = Some(value);
                }
            }
            Some("fileType") => {
                if let Ok(value) = field.text().await {
                    file_type = Some(value);
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| GatewayError::invalid("missing file field"))?;
    let name = file_name.ok_or_else(|| GatewayError::invalid("missing file name"))?;

    let stream = futures::stream::once(async move { Ok::<_, io::Error>(bytes) });
    let outcome = state
        .media
        .upload_stream(&principal.id, &name, file_type, stream)
        .await?;

    Ok(Json(UploadResponse {
        key: outcome.record.key,
    }))
}

/// `POST /api/upload` — legacy raw-body upload, file name in `x-file-name`.
/// Also backs `POST /api/media/upload-stream`, the large-file path; the body
/// is piped straight into the blob store without buffering.
pub async fn upload_raw(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;

    let name = headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::invalid("missing x-file-name header"))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let outcome = state
        .media
        .upload_stream(&principal.id, &name, content_type, stream)
        .await?;

    Ok(Json(UploadResponse {
        key: outcome.record.key,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Base64Upload {
    pub file_name: String,
    pub file_type: Option<String>,
    pub data: String,
}

/// `POST /api/media/upload-base64` — JSON last-resort upload for clients
/// that cannot send binary bodies.
pub async fn upload_base64(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Base64Upload>,
) -> Result<Json<UploadResponse>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;

    let bytes = general_purpose::STANDARD
        .decode(payload.data.as_bytes())
        .map_err(|err| GatewayError::invalid(format!("invalid base64 payload: {}", err)))?;

    let stream =
        futures::stream::once(async move { Ok::<_, io::Error>(bytes::Bytes::from(bytes)) });
    let outcome = state
        .media
        .upload_stream(&principal.id, &payload.file_name, payload.file_type, stream)
        .await?;

    Ok(Json(UploadResponse {
        key: outcome.record.key,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Narrow exception to bearer-header auth, for `<img src>` contexts
    /// that cannot set headers. Accepted only on the read path.
    pub token: Option<String>,
}

/// `GET /api/media/{*key}` — stream a blob to the caller.
///
/// The body is piped from the blob store's read stream; the stored content
/// type and a private cache directive are set. A record whose blob is gone
/// is retired as a ghost and reported as `NotFound`. HEAD requests hit this
/// handler too (axum strips the body), which is the orchestrator's
/// post-upload existence probe.
pub async fn stream_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let principal = authenticate(&state, &headers, q.token.as_deref()).await?;
    check_access(&state, &principal, &key)?;

    let (record, file) = state.media.open_reader(&key).await?;
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    set_media_headers(response.headers_mut(), &record);
    Ok(response)
}

/// `DELETE /api/media/{*key}` — remove blob and record, idempotently.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;
    check_access(&state, &principal, &key)?;

    state.media.delete(&key).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Admin-only: list another user's records.
    pub user: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub status: MediaStatus,
    pub recovered: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

impl From<MediaRecord> for MediaItem {
    fn from(record: MediaRecord) -> Self {
        let url = format!("/api/media/{}", record.key);
        Self {
            key: record.key,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            status: record.status,
            recovered: record.recovered,
            created_at: record.created_at,
            url,
        }
    }
}

/// `GET /api/media` — list the caller's records, newest first. Admins may
/// pass `?user=<ownerId>` to scope to another owner.
pub async fn list_media(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;

    let owner = match q.user {
        Some(target) if target != principal.id => {
            if !principal.is_admin(&state.admin_email) {
                return Err(GatewayError::Forbidden);
            }
            target
        }
        _ => principal.id.clone(),
    };

    let items: Vec<MediaItem> = state
        .media
        .list(&owner)
        .await?
        .into_iter()
        .map(MediaItem::from)
        .collect();

    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: MediaStatus,
}

/// `POST /api/media/{*key}` — moderation transition, admin only.
pub async fn set_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<MediaItem>, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;
    if !principal.is_admin(&state.admin_email) {
        return Err(GatewayError::Forbidden);
    }
    if !matches!(update.status, MediaStatus::Approved | MediaStatus::Rejected) {
        return Err(GatewayError::invalid(
            "status must be `approved` or `rejected`",
        ));
    }

    let record = state.media.set_status(&key, update.status).await?;
    Ok(Json(MediaItem::from(record)))
}

fn set_media_headers(headers: &mut HeaderMap, record: &MediaRecord) {
    let content_type = record
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );

    if let Some(etag) = record.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }
}

/// `POST /api/admin/reconcile` — admin-triggered drift sweep. Returns the
/// counts of corrections applied.
pub async fn trigger_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let principal = authenticate(&state, &headers, None).await?;
    if !principal.is_admin(&state.admin_email) {
        return Err(GatewayError::Forbidden);
    }

    let report = crate::services::reconcile::reconcile(&state.media).await?;
    Ok((StatusCode::OK, Json(report)))
}
