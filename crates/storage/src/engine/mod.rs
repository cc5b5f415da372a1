//! Per-store engine.
//!
//! One `StoreEngine` owns one SQLite database file in WAL mode:
//! concurrent readers, a single writer serialised by [`begin_write`].
//! Every mutating operation appends its change-log records inside the
//! same transaction that touches the domain tables, so the log and the
//! tables can never disagree.
//!
//! [`begin_write`]: StoreEngine::begin_write

mod change_log;
mod idempotency;
mod ingest;
pub mod lore_ops;
mod stats;

pub use change_log::CompactionOutcome;

use chrono::Duration as ChronoDuration;
use engram_core::config::StorageConfig;
use engram_core::error::{Error, Result};
use engram_core::StoreId;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::plugin::DomainPlugin;
use crate::snapshot::SnapshotManager;

/// Base sync-engine migrations, shared by every store.
static BASE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Base schema version before any plugin migrations apply.
const BASE_SCHEMA_VERSION: i64 = 1;

/// File name of a store's database inside its directory.
pub const STORE_DB_FILE: &str = "engram.db";

/// Subdirectory holding a store's snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Sync metadata keys used by the engine.
pub mod meta_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const STORE_TYPE: &str = "store_type";
    pub const STORE_DESCRIPTION: &str = "store_description";
    pub const LAST_SNAPSHOT_SEQ: &str = "last_snapshot_seq";
    pub const LAST_SNAPSHOT_AT: &str = "last_snapshot_at";
    pub const LAST_COMPACTION_SEQ: &str = "last_compaction_seq";
    pub const LAST_COMPACTION_AT: &str = "last_compaction_at";
}

/// A single-writer transaction over a store database.
///
/// Holding one of these is holding the store's writer slot; it is
/// released on commit, rollback, or drop (drop rolls back).
pub struct WriteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    _permit: OwnedSemaphorePermit,
}

impl WriteTransaction {
    /// The underlying connection, for queries scoped to this transaction.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::storage(format!("Failed to commit transaction: {e}")))
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::storage(format!("Failed to rollback transaction: {e}")))
    }
}

/// Engine for one store: owns the database pool and all transactional
/// operations on it.
pub struct StoreEngine {
    store_id: StoreId,
    pool: SqlitePool,
    write_lock: Arc<Semaphore>,
    plugin: Arc<dyn DomainPlugin>,
    snapshots: SnapshotManager,
    idempotency_ttl: ChronoDuration,
}

impl StoreEngine {
    /// Open (or create) the store database under `store_dir` and bring
    /// its schema up to date.
    pub async fn open(
        store_id: StoreId,
        store_dir: &Path,
        plugin: Arc<dyn DomainPlugin>,
        config: &StorageConfig,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(store_dir).await?;
        let db_path = store_dir.join(STORE_DB_FILE);
        let snapshot_dir = store_dir.join(SNAPSHOT_DIR);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::storage(format!("Failed to open store database: {e}")))?;

        let engine = Self {
            snapshots: SnapshotManager::new(store_id.clone(), snapshot_dir),
            store_id,
            pool,
            write_lock: Arc::new(Semaphore::new(1)),
            plugin,
            idempotency_ttl: ChronoDuration::hours(config.idempotency_ttl_hours),
        };

        engine.apply_migrations().await?;
        debug!(store = %engine.store_id, "store engine opened");
        Ok(engine)
    }

    /// Run base migrations, then any plugin migrations not yet applied,
    /// and record the resulting schema version.
    async fn apply_migrations(&self) -> Result<()> {
        BASE_MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("Base migration failed: {e}")))?;

        let mut schema_version = BASE_SCHEMA_VERSION;
        for migration in self.plugin.migrations() {
            let applied: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM plugin_migrations WHERE version = ?")
                    .bind(migration.version)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| Error::storage(format!("Migration lookup failed: {e}")))?;

            if applied.is_none() {
                info!(
                    store = %self.store_id,
                    version = migration.version,
                    "applying plugin migration: {}",
                    migration.description
                );
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| Error::storage(format!("Failed to begin migration: {e}")))?;
                sqlx::raw_sql(migration.sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::storage(format!(
                            "Plugin migration {} failed: {e}",
                            migration.version
                        ))
                    })?;
                sqlx::query(
                    "INSERT INTO plugin_migrations (version, description, applied_at)
                     VALUES (?, ?, ?)",
                )
                .bind(migration.version)
                .bind(migration.description)
                .bind(chrono::Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::storage(format!("Migration bookkeeping failed: {e}")))?;
                tx.commit()
                    .await
                    .map_err(|e| Error::storage(format!("Failed to commit migration: {e}")))?;
            }
            schema_version = schema_version.max(migration.version);
        }

        self.set_metadata(meta_keys::SCHEMA_VERSION, &schema_version.to_string())
            .await?;
        Ok(())
    }

    pub fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    pub fn plugin(&self) -> &Arc<dyn DomainPlugin> {
        &self.plugin
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn idempotency_ttl(&self) -> ChronoDuration {
        self.idempotency_ttl
    }

    /// Acquire the store's writer slot and begin a transaction.
    ///
    /// Readers keep using the pool directly; only writers queue here.
    pub async fn begin_write(&self) -> Result<WriteTransaction> {
        let permit = self
            .write_lock
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::storage(format!("Writer lock poisoned: {e}")))?;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage(format!("Failed to begin transaction: {e}")))?;
        Ok(WriteTransaction {
            tx,
            _permit: permit,
        })
    }

    /// Read one sync metadata value.
    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::storage(format!("Metadata read failed: {e}")))?;
        Ok(row.map(|(value,)| value))
    }

    /// Write one sync metadata value.
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_metadata (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(format!("Metadata write failed: {e}")))?;
        Ok(())
    }

    /// The store's current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        Ok(self
            .get_metadata(meta_keys::SCHEMA_VERSION)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(BASE_SCHEMA_VERSION))
    }

    /// Snapshot operations for this store.
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Generate a fresh snapshot of this store (single generation at a
    /// time; see [`SnapshotManager::generate`]).
    pub async fn generate_snapshot(&self) -> Result<crate::snapshot::SnapshotInfo> {
        let info = self.snapshots.generate(&self.pool).await?;
        self.set_metadata(meta_keys::LAST_SNAPSHOT_SEQ, &info.sequence.to_string())
            .await?;
        self.set_metadata(
            meta_keys::LAST_SNAPSHOT_AT,
            &info.created_at.to_rfc3339(),
        )
        .await?;
        Ok(info)
    }

    /// When this store last produced a snapshot, if ever.
    pub async fn last_snapshot_at(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(self
            .get_metadata(meta_keys::LAST_SNAPSHOT_AT)
            .await?
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)))
    }

    /// Close the underlying pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Directory path helper: where a store with this id lives.
    pub fn store_dir(root: &Path, store_id: &StoreId) -> PathBuf {
        root.join(store_id.relative_path())
    }
}
