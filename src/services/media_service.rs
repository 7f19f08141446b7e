//! MediaService — gateway core backed by SQLite for the media index and
//! local disk for blob payloads. Blobs live at `base_path/<owner>/<file>`;
//! the leading owner segment of the key is the authorization boundary, so
//! no extra sharding layer is needed.
//!
//! Ordering invariant: within one upload the blob write completes (and its
//! success is observed) before the index write is attempted, never the
//! reverse. Within one delete the blob delete is attempted first. The index
//! is the cheap index of truth for listing; the blob store is the expensive
//! source of truth for existence.

use crate::{
    models::media::{MediaRecord, MediaStatus},
    policy,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media record for `{0}` not found")]
    RecordNotFound(String),
    #[error("blob for `{0}` is missing")]
    BlobMissing(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("empty upload body")]
    EmptyBody,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Outcome of an upload. `indexed` is false when the blob landed but the
/// record insert failed — the orphan case the reconciler repairs; the caller
/// still gets the key because the bytes are safe.
#[derive(Debug)]
pub struct UploadOutcome {
    pub record: MediaRecord,
    pub indexed: bool,
}

#[derive(Clone)]
pub struct MediaService {
    /// Shared SQLite connection pool used for index operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    pub base_path: PathBuf,
}

impl MediaService {
    /// Create a new MediaService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for blob payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    fn ensure_key_safe(&self, key: &str) -> MediaResult<()> {
        policy::ensure_key_safe(key).map_err(MediaError::InvalidKey)
    }

    /// Physical payload path for a key. Keys are `<owner>/<file>`, so the
    /// on-disk layout is one directory per owner.
    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Fetch the index record for a key, excluding retired ghosts.
    async fn fetch_record(&self, key: &str) -> MediaResult<MediaRecord> {
        sqlx::query_as::<_, MediaRecord>(
            "SELECT id, owner_id, key, original_name, content_type, size_bytes, etag,
                    status, recovered, created_at
             FROM media
             WHERE key = ? AND status != 'ghost'",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MediaError::RecordNotFound(key.to_string()),
            other => MediaError::Sqlx(other),
        })
    }

    /// Stream an upload to disk, then index it.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Inserts the media record with `status=pending`.
    ///
    /// A blob failure aborts with nothing written. A record-insert failure
    /// after a successful blob write is logged and reported as
    /// `indexed=false` rather than an error; the bytes are durable and the
    /// reconcile sweep will re-create the record.
    pub async fn upload_stream<S>(
        &self,
        owner_id: &str,
        original_name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> MediaResult<UploadOutcome>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let key = policy::new_key(owner_id, original_name);
        self.ensure_key_safe(&key)?;

        let file_path = self.blob_path(&key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            MediaError::Io(io::Error::other("blob path missing parent directory"))
        })?;
        // Stage under the blob root, not the owner directory: a rejected
        // upload must not leave an empty `<owner>/` directory behind.
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(MediaError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(MediaError::Io(err));
            }
        }
        if size_bytes == 0 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::EmptyBody);
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::Io(err));
        }

        if let Err(err) = fs::create_dir_all(&parent).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::Io(err));
        }

        let record = MediaRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            key: key.clone(),
            original_name: original_name.to_string(),
            content_type,
            size_bytes,
            etag: Some(format!("{:x}", digest.compute())),
            status: MediaStatus::Pending,
            recovered: false,
            created_at: Utc::now(),
        };

        match self.insert_record(&record).await {
            Ok(()) => Ok(UploadOutcome {
                record,
                indexed: true,
            }),
            Err(err) => {
                // Blob is durable; do not fail the upload. The orphan sweep
                // will re-index it.
                warn!(key = %key, "blob stored but index write failed: {}", err);
                Ok(UploadOutcome {
                    record,
                    indexed: false,
                })
            }
        }
    }

    async fn insert_record(&self, record: &MediaRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO media (id, owner_id, key, original_name, content_type,
                                size_bytes, etag, status, recovered, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(&record.key)
        .bind(&record.original_name)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(&record.etag)
        .bind(record.status)
        .bind(record.recovered)
        .bind(record.created_at)
        .execute(&*self.db)
        .await
        .map(|_| ())
    }

    /// Fetch a record and an opened file handle ready for streaming out.
    ///
    /// If the record exists but the blob is gone, the record is retired as a
    /// ghost before returning `BlobMissing`, so subsequent listings stop
    /// offering it.
    pub async fn open_reader(&self, key: &str) -> MediaResult<(MediaRecord, File)> {
        self.ensure_key_safe(key)?;
        let record = self.fetch_record(key).await?;

        let file_path = self.blob_path(key);
        match File::open(&file_path).await {
            Ok(file) => Ok((record, file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.retire_ghost(key).await?;
                Err(MediaError::BlobMissing(key.to_string()))
            }
            Err(err) => Err(MediaError::Io(err)),
        }
    }

    /// Fetch record metadata, verifying the blob still exists.
    ///
    /// Backs the HEAD existence probe; applies the same lazy ghost marking
    /// as the read path.
    pub async fn metadata(&self, key: &str) -> MediaResult<MediaRecord> {
        self.ensure_key_safe(key)?;
        let record = self.fetch_record(key).await?;

        match fs::metadata(self.blob_path(key)).await {
            Ok(_) => Ok(record),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.retire_ghost(key).await?;
                Err(MediaError::BlobMissing(key.to_string()))
            }
            Err(err) => Err(MediaError::Io(err)),
        }
    }

    /// Mark a record whose blob disappeared. Retired records keep their row
    /// for audit but vanish from listings.
    async fn retire_ghost(&self, key: &str) -> MediaResult<()> {
        let result = sqlx::query("UPDATE media SET status = 'ghost' WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() > 0 {
            tracing::info!(key = %key, kind = "ghost", action = "retired record", "drift correction");
        }
        Ok(())
    }

    /// Delete a blob and its record, blob first.
    ///
    /// Idempotent: a missing blob or an already-deleted record is not an
    /// error. The end state the caller cares about is "this key is gone",
    /// and it is reached either way.
    pub async fn delete(&self, key: &str) -> MediaResult<()> {
        self.ensure_key_safe(key)?;

        let file_path = self.blob_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(MediaError::Io(err)),
        }

        sqlx::query("DELETE FROM media WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(())
    }

    /// List an owner's records, newest first, ghosts excluded.
    ///
    /// No per-item blob existence check happens here; that would be O(n)
    /// blocking calls on every page load. Ghost detection is lazy (read
    /// path) and out-of-band (reconcile sweep).
    pub async fn list(&self, owner_id: &str) -> MediaResult<Vec<MediaRecord>> {
        let rows = sqlx::query_as::<_, MediaRecord>(
            "SELECT id, owner_id, key, original_name, content_type, size_bytes, etag,
                    status, recovered, created_at
             FROM media
             WHERE owner_id = ? AND status != 'ghost'
             ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Moderation transition. Last-writer-wins on the status column.
    pub async fn set_status(&self, key: &str, status: MediaStatus) -> MediaResult<MediaRecord> {
        self.ensure_key_safe(key)?;
        let _ = self.fetch_record(key).await?;

        sqlx::query("UPDATE media SET status = ? WHERE key = ? AND status != 'ghost'")
            .bind(status)
            .bind(key)
            .execute(&*self.db)
            .await?;

        self.fetch_record(key).await
    }

    /// Does the blob exist on disk? Used by tests and the reconciler.
    pub async fn blob_exists(&self, key: &str) -> bool {
        fs::metadata(self.blob_path(key)).await.is_ok()
    }

    /// Remove empty owner directories left behind by deletes.
    ///
    /// Stops on not-empty, not-found, or when leaving the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

impl From<MediaError> for crate::errors::GatewayError {
    fn from(err: MediaError) -> Self {
        use crate::errors::GatewayError;
        match err {
            MediaError::RecordNotFound(_) | MediaError::BlobMissing(_) => GatewayError::NotFound,
            MediaError::InvalidKey(reason) => GatewayError::InvalidArgument(reason),
            MediaError::EmptyBody => GatewayError::invalid("empty upload body"),
            MediaError::Sqlx(e) => {
                tracing::error!("index backend failed: {}", e);
                GatewayError::StorageUnavailable
            }
            MediaError::Io(e) => {
                tracing::error!("blob backend failed: {}", e);
                GatewayError::StorageUnavailable
            }
        }
    }
}
