//! Represents an uploaded media object's index record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Moderation / lifecycle status of a media record.
///
/// `Ghost` marks a record whose backing blob turned out to be missing; ghost
/// records are excluded from listings but kept for audit.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Approved,
    Rejected,
    Ghost,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Approved => "approved",
            MediaStatus::Rejected => "rejected",
            MediaStatus::Ghost => "ghost",
        }
    }
}

impl std::str::FromStr for MediaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MediaStatus::Pending),
            "approved" => Ok(MediaStatus::Approved),
            "rejected" => Ok(MediaStatus::Rejected),
            "ghost" => Ok(MediaStatus::Ghost),
            other => Err(format!("unknown media status `{}`", other)),
        }
    }
}

/// Index row describing a single stored media object.
///
/// The record stores metadata only, never content bytes. Invariant: `key`
/// always starts with `owner_id` followed by `/`. A record is created only
/// after the blob write succeeded, so a record never references bytes that
/// never landed; the reverse (blob without record) is the orphan case the
/// reconciler repairs.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MediaRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Identity-provider id of the uploader.
    pub owner_id: String,

    /// Object key: `<owner_id>/<suffix>-<sanitized-name>`.
    pub key: String,

    /// File name as submitted by the client, before sanitization.
    pub original_name: String,

    /// Declared MIME type.
    pub content_type: Option<String>,

    /// Size in bytes, measured while streaming the upload.
    pub size_bytes: i64,

    /// MD5 checksum computed during the upload stream.
    pub etag: Option<String>,

    /// Moderation / lifecycle status.
    pub status: MediaStatus,

    /// Set when the record was re-created by the reconciler for an orphaned
    /// blob rather than written by an upload.
    pub recovered: bool,

    /// Creation timestamp; listings order by this, newest first.
    pub created_at: DateTime<Utc>,
}
