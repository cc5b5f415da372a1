//! Per-store storage engine and multi-tenant store management.
//!
//! Each store is one SQLite database (WAL mode, concurrent readers,
//! single writer) holding its domain tables, append-only change log,
//! push idempotency cache, and sync metadata. The [`StoreManager`]
//! routes hierarchical store ids to lazily opened [`StoreEngine`]s, and
//! the [`protocol`] module implements push/delta on top of them.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod engine;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod protocol;
pub mod recall;
pub mod replay;
pub mod snapshot;
pub mod types;

pub use engine::{
    CompactionOutcome, StoreEngine, WriteTransaction, SNAPSHOT_DIR, STORE_DB_FILE,
};
pub use engine::lore_ops::{MergeSource, SYSTEM_SOURCE_ID};
pub use error::StorageError;
pub use manager::StoreManager;
pub use plugin::{DomainPlugin, PluginMigration, PluginRegistry};
pub use protocol::{execute_delta, execute_push, PushOutcome};
pub use recall::{default_registry, RecallPlugin};
pub use replay::{ReplayStore, SqliteReplayStore};
pub use snapshot::{SnapshotInfo, SnapshotManager, SnapshotUploader, SNAPSHOT_FILE};
pub use types::{cosine_similarity, decode_embedding, encode_embedding};
