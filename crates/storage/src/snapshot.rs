//! Snapshot generation and serving.
//!
//! A snapshot is a single consistent SQLite file produced with
//! `VACUUM INTO`, written to a temp file and atomically renamed over
//! `snapshots/current.db`. Generation is single-flight per store: a
//! second caller fails fast with `SnapshotInProgress` instead of
//! queueing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_core::error::{Error, Result};
use engram_core::StoreId;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File name of the current snapshot inside a store's snapshot directory.
pub const SNAPSHOT_FILE: &str = "current.db";

/// Details of a generated snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Highest change-log sequence contained in the snapshot, read back
    /// from the produced file itself.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Optional hook for serving snapshots from an object store. When
/// configured and the presign succeeds, the protocol layer redirects
/// instead of streaming; any error falls back to local streaming.
#[async_trait]
pub trait SnapshotUploader: Send + Sync {
    async fn presigned_url(&self, store_id: &StoreId, snapshot_path: &Path) -> Result<String>;
}

pub struct SnapshotManager {
    store_id: StoreId,
    snapshot_dir: PathBuf,
    generation_lock: Mutex<()>,
}

impl SnapshotManager {
    pub fn new(store_id: StoreId, snapshot_dir: PathBuf) -> Self {
        Self {
            store_id,
            snapshot_dir,
            generation_lock: Mutex::new(()),
        }
    }

    /// Path of the current snapshot file (which may not exist yet).
    pub fn current_path(&self) -> PathBuf {
        self.snapshot_dir.join(SNAPSHOT_FILE)
    }

    /// Produce a fresh snapshot.
    ///
    /// Concurrent calls fail fast: exactly one caller generates, the
    /// rest receive `SnapshotInProgress` without waiting.
    pub async fn generate(&self, pool: &SqlitePool) -> Result<SnapshotInfo> {
        let _guard = self
            .generation_lock
            .try_lock()
            .map_err(|_| Error::SnapshotInProgress)?;

        tokio::fs::create_dir_all(&self.snapshot_dir).await?;
        let tmp_path = self
            .snapshot_dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let tmp_str = tmp_path
            .to_str()
            .ok_or_else(|| Error::storage("snapshot path is not valid UTF-8"))?;

        // VACUUM INTO takes its own read view, so the copy is consistent
        // without blocking the writer.
        sqlx::query("VACUUM INTO ?")
            .bind(tmp_str)
            .execute(pool)
            .await
            .map_err(|e| Error::storage(format!("VACUUM INTO failed: {e}")))?;

        let sequence = match self.read_snapshot_sequence(&tmp_path).await {
            Ok(sequence) => sequence,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        let file = tokio::fs::File::open(&tmp_path).await?;
        file.sync_all().await?;
        let size_bytes = file.metadata().await?.len();
        drop(file);

        tokio::fs::rename(&tmp_path, self.current_path()).await?;
        std::fs::File::open(&self.snapshot_dir)?.sync_all()?;

        let info = SnapshotInfo {
            sequence,
            created_at: Utc::now(),
            size_bytes,
        };
        info!(
            store = %self.store_id,
            sequence = info.sequence,
            size_bytes = info.size_bytes,
            "snapshot generated"
        );
        Ok(info)
    }

    /// Open the current snapshot for streaming.
    pub async fn open_snapshot(&self) -> Result<(tokio::fs::File, u64)> {
        let path = self.current_path();
        if !path.exists() {
            return Err(Error::SnapshotNotAvailable);
        }
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        debug!(store = %self.store_id, len, "serving snapshot");
        Ok((file, len))
    }

    /// The snapshot's own view of its latest sequence, read from the
    /// produced file rather than the live database.
    async fn read_snapshot_sequence(&self, path: &Path) -> Result<i64> {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .connect()
            .await
            .map_err(|e| Error::storage(format!("Failed to open snapshot file: {e}")))?;
        let (sequence,): (i64,) = sqlx::query_as(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'change_log'), 0)",
        )
        .fetch_one(&mut conn)
        .await
        .map_err(|e| Error::storage(format!("Snapshot sequence read failed: {e}")))?;
        Ok(sequence)
    }
}
