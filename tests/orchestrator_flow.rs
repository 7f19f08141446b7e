//! End-to-end tests for the upload orchestrator's strategy chain, retry
//! behavior, and post-upload verification, against small mock gateways.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use media_store::client::{CandidateFile, UploadError, UploadProgress, Uploader};
use serde_json::json;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock gateway");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve mock");
    });
    format!("http://{}", addr)
}

fn sample_file() -> CandidateFile {
    CandidateFile {
        name: "photo.png".into(),
        content_type: "image/png".into(),
        bytes: Bytes::from(vec![7u8; 2048]),
    }
}

fn fast_uploader(base_url: &str) -> Uploader {
    let mut uploader = Uploader::new(base_url, "t0k3n");
    uploader.retry.base_delay = Duration::from_millis(1);
    uploader.retry.attempt_timeout = Duration::from_secs(2);
    uploader
}

async fn upload_ok() -> Json<serde_json::Value> {
    Json(json!({ "key": "u1/1700000000000-ab12-photo.png" }))
}

async fn probe_ok() -> StatusCode {
    StatusCode::OK
}

#[tokio::test]
async fn absent_endpoint_advances_chain_without_exhausting_retries() {
    // No /api/media/upload route: the first strategy 404s (systemic) and
    // the orchestrator must fall through to the legacy raw endpoint on its
    // very next attempt.
    let router = Router::new()
        .route("/api/upload", post(upload_ok))
        .route("/api/media/{*key}", get(probe_ok));
    let base = spawn(router).await;

    let mut milestones = Vec::new();
    let receipt = fast_uploader(&base)
        .upload(&sample_file(), |p| milestones.push(p))
        .await
        .expect("upload");

    assert_eq!(receipt.method, "legacy-raw");
    assert_eq!(receipt.attempts, 2);
    assert_eq!(milestones.first(), Some(&UploadProgress::Started));
    assert!(milestones.contains(&UploadProgress::Fallback { to: "legacy-raw" }));
    assert!(milestones.contains(&UploadProgress::Verifying));
}

#[tokio::test]
async fn transient_failure_is_retried_in_place() {
    // First multipart call returns 503, second succeeds: same strategy,
    // two attempts, no fallthrough.
    let calls = Arc::new(AtomicU32::new(0));

    async fn flaky(State(calls): State<Arc<AtomicU32>>) -> axum::response::Response {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
            Json(json!({ "key": "u1/1700000000000-ab12-photo.png" })).into_response()
        }
    }

    let router = Router::new()
        .route("/api/media/upload", post(flaky))
        .route("/api/media/{*key}", get(probe_ok))
        .with_state(calls.clone());
    let base = spawn(router).await;

    let receipt = fast_uploader(&base)
        .upload(&sample_file(), |_| {})
        .await
        .expect("upload");

    assert_eq!(receipt.method, "multipart");
    assert_eq!(receipt.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unauthorized_is_terminal_with_no_fallthrough() {
    let fallback_calls = Arc::new(AtomicU32::new(0));

    async fn reject() -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    async fn count(State(calls): State<Arc<AtomicU32>>) -> Json<serde_json::Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "key": "u1/x-y-z.png" }))
    }

    let router = Router::new()
        .route("/api/media/upload", post(reject))
        .route("/api/upload", post(count))
        .with_state(fallback_calls.clone());
    let base = spawn(router).await;

    let err = fast_uploader(&base)
        .upload(&sample_file(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Unauthorized));
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhaustion_names_the_last_cause_and_counts_attempts() {
    // Every endpoint is absent: one systemic failure per strategy, four
    // attempts total, and an aggregate error instead of a silent success.
    let router = Router::new();
    let base = spawn(router).await;

    let err = fast_uploader(&base)
        .upload(&sample_file(), |_| {})
        .await
        .unwrap_err();

    match err {
        UploadError::Exhausted {
            attempts,
            last_cause,
        } => {
            assert_eq!(attempts, 4);
            assert!(last_cause.contains("404"), "last cause was: {}", last_cause);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_existence_probe_surfaces_verification_failed() {
    async fn probe_missing() -> StatusCode {
        StatusCode::NOT_FOUND
    }

    let router = Router::new()
        .route("/api/media/upload", post(upload_ok))
        .route("/api/media/{*key}", get(probe_missing));
    let base = spawn(router).await;

    let err = fast_uploader(&base)
        .upload(&sample_file(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::VerificationFailed { .. }));
}
