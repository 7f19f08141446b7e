//! Reconciliation between the media index and the blob store.
//!
//! Two drift states are possible: an orphan blob (bytes on disk, no record;
//! a crash between the blob write and the index write) and a ghost record
//! (record present, blob gone; external deletion or a partial delete).
//! The sweep repairs both by touching records only — it inserts catch-up
//! records for orphans and retires ghosts. It never deletes bytes, so it is
//! safe to run concurrently with ordinary uploads.

use crate::{
    models::media::{MediaRecord, MediaStatus},
    services::media_service::{MediaResult, MediaService},
};
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Counts of corrections applied by one sweep.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub scanned_blobs: usize,
    pub scanned_records: usize,
    pub recovered_orphans: usize,
    pub retired_ghosts: usize,
}

/// Run one full sweep: retire ghosts, then index orphans.
///
/// Every correction is logged with the key, the drift kind, and the action
/// taken, for audit. Record churn from uploads racing the sweep is benign:
/// inserts are guarded by the key's uniqueness and ghost retirement is a
/// status-only update.
pub async fn reconcile(service: &MediaService) -> MediaResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    retire_ghosts(service, &mut report).await?;
    recover_orphans(service, &mut report).await?;

    info!(
        blobs = report.scanned_blobs,
        records = report.scanned_records,
        orphans = report.recovered_orphans,
        ghosts = report.retired_ghosts,
        "reconcile sweep complete"
    );
    Ok(report)
}

/// Cross-check every live record against blob existence.
async fn retire_ghosts(service: &MediaService, report: &mut ReconcileReport) -> MediaResult<()> {
    let records = sqlx::query_as::<_, MediaRecord>(
        "SELECT id, owner_id, key, original_name, content_type, size_bytes, etag,
                status, recovered, created_at
         FROM media WHERE status != 'ghost'",
    )
    .fetch_all(&*service.db)
    .await?;

    for record in records {
        report.scanned_records += 1;
        if service.blob_exists(&record.key).await {
            continue;
        }
        sqlx::query("UPDATE media SET status = 'ghost' WHERE key = ?")
            .bind(&record.key)
            .execute(&*service.db)
            .await?;
        report.retired_ghosts += 1;
        info!(key = %record.key, kind = "ghost", action = "retired record", "drift correction");
    }
    Ok(())
}

/// Walk `base_path/<owner>/<file>` and insert catch-up records for blobs no
/// record references. Recovered records are flagged so moderation can tell
/// them apart from ordinary uploads.
async fn recover_orphans(service: &MediaService, report: &mut ReconcileReport) -> MediaResult<()> {
    let mut owners = match fs::read_dir(&service.base_path).await {
        Ok(entries) => entries,
        // Nothing stored yet.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    while let Some(owner_entry) = owners.next_entry().await? {
        if !owner_entry.file_type().await?.is_dir() {
            continue;
        }
        let owner_id = owner_entry.file_name().to_string_lossy().to_string();

        let mut files = fs::read_dir(owner_entry.path()).await?;
        while let Some(file_entry) = files.next_entry().await? {
            let file_name = file_entry.file_name().to_string_lossy().to_string();
            // Skip in-flight temp files from concurrent uploads.
            if file_name.starts_with(".tmp-") || !file_entry.file_type().await?.is_file() {
                continue;
            }
            report.scanned_blobs += 1;
            let key = format!("{}/{}", owner_id, file_name);

            let known: Option<(String,)> =
                sqlx::query_as("SELECT key FROM media WHERE key = ?")
                    .bind(&key)
                    .fetch_optional(&*service.db)
                    .await?;
            if known.is_some() {
                continue;
            }

            let size_bytes = file_entry.metadata().await?.len() as i64;
            let record = MediaRecord {
                id: Uuid::new_v4(),
                owner_id: owner_id.clone(),
                key: key.clone(),
                original_name: original_name_from_key(&file_name),
                content_type: None,
                size_bytes,
                etag: None,
                status: MediaStatus::Pending,
                recovered: true,
                created_at: Utc::now(),
            };

            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO media (id, owner_id, key, original_name, content_type,
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
            .execute(&*service.db)
            .await?;

            if inserted.rows_affected() > 0 {
                report.recovered_orphans += 1;
                info!(key = %key, kind = "orphan", action = "recovered record", "drift correction");
            }
        }
    }
    Ok(())
}

/// Best-effort original name from the stored file name, which is
/// `<millis>-<token>-<sanitized-name>` for gateway-generated keys.
fn original_name_from_key(file_name: &str) -> String {
    file_name
        .splitn(3, '-')
        .nth(2)
        .unwrap_or(file_name)
        .to_string()
}

/// Periodic sweep driver, spawned from `main` when an interval is
/// configured. Communicates with the gateway only through the index and the
/// blob store, so it could equally run out-of-process.
pub async fn run_periodic(service: MediaService, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = reconcile(&service).await {
            warn!("periodic reconcile sweep failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_name_recovery() {
        assert_eq!(
            original_name_from_key("1700000000000-abc123-photo.png"),
            "photo.png"
        );
        assert_eq!(
            original_name_from_key("1700000000000-abc123-two-part-name.png"),
            "two-part-name.png"
        );
        assert_eq!(original_name_from_key("oddball"), "oddball");
    }
}
