//! Full-stack gateway tests: a real router with a real service layer,
//! authenticated against a mock identity provider, driven over HTTP by the
//! upload orchestrator and plain requests.

use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::get};
use bytes::Bytes;
use media_store::{
    client::{CandidateFile, Uploader},
    routes::routes::{AppState, routes},
    services::{identity::IdentityVerifier, media_service::MediaService},
};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

/// Mock identity provider: `token-u1` → u1, `token-u2` → u2,
/// `token-admin` → the admin principal, anything else → 401.
async fn who_am_i(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    match token {
        "token-u1" => Ok(Json(json!({ "id": "u1", "email": "u1@example.com" }))),
        "token-u2" => Ok(Json(json!({ "id": "u2", "email": "u2@example.com" }))),
        "token-admin" => Ok(Json(json!({ "id": "adm", "email": "admin@example.com" }))),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{}", addr)
}

/// Boot the identity mock plus a full gateway on ephemeral ports.
async fn boot() -> (String, TempDir) {
    let identity_base = serve(Router::new().route("/api/auth/me", get(who_am_i))).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("pool");
    for stmt in include_str!("../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&pool).await.expect("migration");
    }

    let state = AppState {
        media: MediaService::new(Arc::new(pool), dir.path()),
        identity: IdentityVerifier::new(identity_base, Duration::from_secs(2)),
        admin_email: "admin@example.com".into(),
    };
    (serve(routes(state)).await, dir)
}

fn png(bytes: &'static [u8]) -> CandidateFile {
    CandidateFile {
        name: "photo.png".into(),
        content_type: "image/png".into(),
        bytes: Bytes::from_static(bytes),
    }
}

#[tokio::test]
async fn upload_stream_delete_lifecycle() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    let receipt = Uploader::new(base.as_str(), "token-u1")
        .upload(&png(b"these are the photo bytes"), |_| {})
        .await
        .expect("upload");
    assert!(receipt.key.starts_with("u1/"));

    // Owner reads back identical bytes with the stored content type.
    let response = http
        .get(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-u1")
        .send()
        .await
        .expect("get");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("private, max-age=3600")
    );
    assert_eq!(response.bytes().await.expect("body"), Bytes::from_static(b"these are the photo bytes"));

    // A different principal gets NotFound, not Forbidden: existence must
    // not leak through the error kind.
    let response = http
        .get(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-u2")
        .send()
        .await
        .expect("get as u2");
    assert_eq!(response.status(), 404);

    // The admin can read any key.
    let response = http
        .get(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-admin")
        .send()
        .await
        .expect("get as admin");
    assert_eq!(response.status(), 200);

    // Token accepted via query parameter on the read path (img-src case).
    let response = http
        .get(format!("{}/api/media/{}?token=token-u1", base, receipt.key))
        .send()
        .await
        .expect("get with query token");
    assert_eq!(response.status(), 200);

    // Delete is idempotent over HTTP.
    for _ in 0..2 {
        let response = http
            .delete(format!("{}/api/media/{}", base, receipt.key))
            .bearer_auth("token-u1")
            .send()
            .await
            .expect("delete");
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.json::<Value>().await.expect("body"),
            json!({ "ok": true })
        );
    }

    let response = http
        .get(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-u1")
        .send()
        .await
        .expect("get after delete");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn cors_preflight_is_answered_unconditionally() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    let response = http
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/api/media/upload", base),
        )
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization,x-file-name")
        .send()
        .await
        .expect("preflight");

    assert!(response.status().is_success());
    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_some()
    );
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{}/api/media", base))
        .send()
        .await
        .expect("no token");
    assert_eq!(response.status(), 401);

    let response = http
        .get(format!("{}/api/media", base))
        .bearer_auth("token-forged")
        .send()
        .await
        .expect("bad token");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn empty_raw_upload_is_bad_request() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/upload", base))
        .bearer_auth("token-u1")
        .header("x-file-name", "empty.png")
        .header("content-type", "image/png")
        .body(Vec::<u8>::new())
        .send()
        .await
        .expect("empty upload");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn listing_is_scoped_and_admin_can_target_users() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    Uploader::new(base.as_str(), "token-u1")
        .upload(&png(b"u1's workout video still"), |_| {})
        .await
        .expect("u1 upload");
    Uploader::new(base.as_str(), "token-u2")
        .upload(&png(b"u2's progress picture"), |_| {})
        .await
        .expect("u2 upload");

    let body: Value = http
        .get(format!("{}/api/media", base))
        .bearer_auth("token-u1")
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert!(items[0]["key"].as_str().unwrap().starts_with("u1/"));
    assert!(items[0]["url"].as_str().unwrap().starts_with("/api/media/u1/"));

    // A non-admin cannot scope to another user.
    let response = http
        .get(format!("{}/api/media?user=u1", base))
        .bearer_auth("token-u2")
        .send()
        .await
        .expect("cross list");
    assert_eq!(response.status(), 403);

    // The admin can.
    let body: Value = http
        .get(format!("{}/api/media?user=u1", base))
        .bearer_auth("token-admin")
        .send()
        .await
        .expect("admin list")
        .json()
        .await
        .expect("json");
    assert_eq!(body["items"].as_array().expect("items").len(), 1);
}

#[tokio::test]
async fn moderation_is_admin_only() {
    let (base, _dir) = boot().await;
    let http = reqwest::Client::new();

    let receipt = Uploader::new(base.as_str(), "token-u1")
        .upload(&png(b"pending review material"), |_| {})
        .await
        .expect("upload");

    let response = http
        .post(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-u1")
        .json(&json!({ "status": "approved" }))
        .send()
        .await
        .expect("self approve");
    assert_eq!(response.status(), 403);

    let body: Value = http
        .post(format!("{}/api/media/{}", base, receipt.key))
        .bearer_auth("token-admin")
        .json(&json!({ "status": "approved" }))
        .send()
        .await
        .expect("admin approve")
        .json()
        .await
        .expect("json");
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn admin_reconcile_endpoint_reports_corrections() {
    let (base, dir) = boot().await;
    let http = reqwest::Client::new();

    // Plant an orphan blob behind the gateway's back.
    let owner_dir = dir.path().join("u1");
    std::fs::create_dir_all(&owner_dir).expect("owner dir");
    std::fs::write(owner_dir.join("1700000000000-ab12-stray.png"), b"stray").expect("orphan");

    let response = http
        .post(format!("{}/api/admin/reconcile", base))
        .bearer_auth("token-u1")
        .send()
        .await
        .expect("non-admin sweep");
    assert_eq!(response.status(), 403);

    let body: Value = http
        .post(format!("{}/api/admin/reconcile", base))
        .bearer_auth("token-admin")
        .send()
        .await
        .expect("admin sweep")
        .json()
        .await
        .expect("json");
    assert_eq!(body["recovered_orphans"], 1);

    // The recovered record is now visible to its owner.
    let body: Value = http
        .get(format!("{}/api/media", base))
        .bearer_auth("token-u1")
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["recovered"], true);
}
