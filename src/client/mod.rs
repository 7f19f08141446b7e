//! Client-side upload orchestrator.
//!
//! Validates a candidate file, then drives an ordered chain of upload
//! strategies against the gateway, each wrapped in retry-with-backoff. A
//! strategy failing *systemically* (endpoint absent) advances the chain
//! immediately; an *operational* failure (reachable but this call failed)
//! is retried in place first. Validation failures are terminal and make no
//! network call at all.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A file the caller wants stored.
#[derive(Clone, Debug)]
pub struct CandidateFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Coarse milestones reported through the progress callback. Advisory UI
/// feedback, not a correctness signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadProgress {
    Started,
    Attempt { strategy: &'static str, attempt: u32 },
    Fallback { to: &'static str },
    Verifying,
    Done { key: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// The file itself is unacceptable. Never retried, never falls through.
    #[error("invalid file: {0}")]
    InvalidArgument(String),

    /// The gateway rejected the token. Re-authentication is the caller's
    /// job, not ours.
    #[error("not authenticated")]
    Unauthorized,

    /// Valid caller, operation not permitted.
    #[error("not permitted")]
    Forbidden,

    /// The upload reported success but the existence probe failed; the
    /// bytes may or may not be durable.
    #[error("upload of `{key}` could not be verified")]
    VerificationFailed { key: String },

    /// Every strategy was exhausted.
    #[error("upload failed after {attempts} attempts: {last_cause}")]
    Exhausted { attempts: u32, last_cause: String },
}

/// Successful result: which strategy landed the bytes and how many attempts
/// it took across the whole chain.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub key: String,
    pub method: &'static str,
    pub attempts: u32,
}

/// Validation bounds applied before any network call.
#[derive(Clone, Debug)]
pub struct UploadLimits {
    pub min_size_bytes: usize,
    pub max_size_bytes: usize,
    pub max_name_len: usize,
    pub allowed_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            // Guards against accidental zero/near-zero-byte submissions.
            min_size_bytes: 8,
            max_size_bytes: 50 * 1024 * 1024,
            max_name_len: 255,
            allowed_types: [
                "image/jpeg",
                "image/png",
                "image/gif",
                "image/webp",
                "video/mp4",
                "video/quicktime",
                "video/webm",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Per-strategy retry configuration.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// The ordered strategy chain. New strategies slot in here without touching
/// the retry/backoff loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Multipart,
    LegacyRaw,
    LargeStream,
    Base64Json,
}

impl Strategy {
    const CHAIN: [Strategy; 4] = [
        Strategy::Multipart,
        Strategy::LegacyRaw,
        Strategy::LargeStream,
        Strategy::Base64Json,
    ];

    fn name(&self) -> &'static str {
        match self {
            Strategy::Multipart => "multipart",
            Strategy::LegacyRaw => "legacy-raw",
            Strategy::LargeStream => "large-stream",
            Strategy::Base64Json => "base64-json",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Strategy::Multipart => "/api/media/upload",
            Strategy::LegacyRaw => "/api/upload",
            Strategy::LargeStream => "/api/media/upload-stream",
            Strategy::Base64Json => "/api/media/upload-base64",
        }
    }
}

/// How a single attempt failed, which decides what happens next.
#[derive(Debug)]
enum AttemptFailure {
    /// Endpoint absent or not implemented: advance the chain immediately.
    Systemic(String),
    /// Endpoint reachable but this call failed: retry in place.
    Operational(String),
    /// No retry, no fallthrough.
    Terminal(UploadError),
}

#[derive(Deserialize)]
struct UploadResponseBody {
    key: String,
}

pub struct Uploader {
    client: reqwest::Client,
    base_url: String,
    token: String,
    pub limits: UploadLimits,
    pub retry: RetryPolicy,
}

impl Uploader {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            limits: UploadLimits::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Deliver a file to the gateway, trying each strategy in order.
    ///
    /// Returns the gateway-assigned key (the orchestrator never guesses
    /// keys), the strategy that succeeded, and the total attempt count. On
    /// exhaustion the error names the last underlying cause — never a bare
    /// "upload failed".
    pub async fn upload(
        &self,
        file: &CandidateFile,
        mut on_progress: impl FnMut(UploadProgress),
    ) -> Result<UploadReceipt, UploadError> {
        validate(file, &self.limits).map_err(UploadError::InvalidArgument)?;
        on_progress(UploadProgress::Started);

        let mut attempts: u32 = 0;
        let mut last_cause = String::from("no strategy attempted");

        for (idx, strategy) in Strategy::CHAIN.iter().enumerate() {
            if idx > 0 {
                on_progress(UploadProgress::Fallback {
                    to: strategy.name(),
                });
            }

            for attempt in 1..=self.retry.max_attempts {
                attempts += 1;
                on_progress(UploadProgress::Attempt {
                    strategy: strategy.name(),
                    attempt,
                });

                let outcome = tokio::time::timeout(
                    self.retry.attempt_timeout,
                    self.attempt(*strategy, file),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(AttemptFailure::Operational(format!(
                        "attempt timed out after {:?}",
                        self.retry.attempt_timeout
                    )))
                });

                match outcome {
                    Ok(key) => {
                        on_progress(UploadProgress::Verifying);
                        self.verify(&key).await?;
                        on_progress(UploadProgress::Done { key: key.clone() });
                        return Ok(UploadReceipt {
                            key,
                            method: strategy.name(),
                            attempts,
                        });
                    }
                    Err(AttemptFailure::Terminal(err)) => return Err(err),
                    Err(AttemptFailure::Systemic(cause)) => {
                        debug!(strategy = strategy.name(), "endpoint absent: {}", cause);
                        last_cause = cause;
                        break;
                    }
                    Err(AttemptFailure::Operational(cause)) => {
                        debug!(
                            strategy = strategy.name(),
                            attempt, "attempt failed: {}", cause
                        );
                        last_cause = cause;
                        if attempt < self.retry.max_attempts {
                            tokio::time::sleep(backoff_delay(self.retry.base_delay, attempt))
                                .await;
                        }
                    }
                }
            }
        }

        Err(UploadError::Exhausted {
            attempts,
            last_cause,
        })
    }

    /// One self-contained attempt against one gateway entry point.
    async fn attempt(
        &self,
        strategy: Strategy,
        file: &CandidateFile,
    ) -> Result<String, AttemptFailure> {
        let url = format!("{}{}", self.base_url, strategy.path());
        let request = match strategy {
            Strategy::Multipart => {
                let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.name.clone())
                    .mime_str(&file.content_type)
                    .map_err(|err| {
                        AttemptFailure::Terminal(UploadError::InvalidArgument(err.to_string()))
                    })?;
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("fileName", file.name.clone())
                    .text("fileType", file.content_type.clone());
                self.client.post(&url).multipart(form)
            }
            Strategy::LegacyRaw | Strategy::LargeStream => self
                .client
                .post(&url)
                .header("x-file-name", &file.name)
                .header(reqwest::header::CONTENT_TYPE, &file.content_type)
                .body(file.bytes.clone()),
            Strategy::Base64Json => self.client.post(&url).json(&serde_json::json!({
                "fileName": file.name,
                "fileType": file.content_type,
                "data": general_purpose::STANDARD.encode(&file.bytes),
            })),
        };

        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| AttemptFailure::Operational(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: UploadResponseBody = response
                .json()
                .await
                .map_err(|err| AttemptFailure::Operational(err.to_string()))?;
            return Ok(body.key);
        }

        Err(classify_status(status.as_u16()))
    }

    /// Lightweight existence probe on the returned key, distinguishing
    /// "stored" from "stored but unconfirmed".
    async fn verify(&self, key: &str) -> Result<(), UploadError> {
        let url = format!("{}/api/media/{}", self.base_url, key);
        let probe = self
            .client
            .head(&url)
            .bearer_auth(&self.token)
            .send()
            .await;

        match probe {
            Ok(response) if response.status().is_success() => Ok(()),
            _ => Err(UploadError::VerificationFailed {
                key: key.to_string(),
            }),
        }
    }
}

/// Fail-fast validation; a violation is terminal and makes no network call.
fn validate(file: &CandidateFile, limits: &UploadLimits) -> Result<(), String> {
    let size = file.bytes.len();
    if size == 0 {
        return Err("file is empty".into());
    }
    if size < limits.min_size_bytes {
        return Err(format!(
            "file is {} bytes, below the {}-byte minimum",
            size, limits.min_size_bytes
        ));
    }
    if size > limits.max_size_bytes {
        return Err(format!(
            "file is {} bytes, above the {}-byte maximum",
            size, limits.max_size_bytes
        ));
    }
    if file.name.is_empty() || file.name.len() > limits.max_name_len {
        return Err(format!(
            "file name must be 1..={} characters",
            limits.max_name_len
        ));
    }
    if !limits
        .allowed_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(&file.content_type))
    {
        return Err(format!("content type `{}` not allowed", file.content_type));
    }
    Ok(())
}

/// Delay before retry `attempt + 1`, doubling from the base interval.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Map a non-success HTTP status to the failure class that drives the
/// retry/fallthrough decision.
fn classify_status(status: u16) -> AttemptFailure {
    match status {
        404 | 405 | 501 => AttemptFailure::Systemic(format!("endpoint absent ({})", status)),
        401 => AttemptFailure::Terminal(UploadError::Unauthorized),
        403 => AttemptFailure::Terminal(UploadError::Forbidden),
        400 | 413 | 422 => AttemptFailure::Terminal(UploadError::InvalidArgument(format!(
            "gateway rejected the file ({})",
            status
        ))),
        other => AttemptFailure::Operational(format!("gateway returned {}", other)),
    }
}
