//! Core types for the engram multi-tenant lore store
//!
//! This crate provides the foundational abstractions used throughout the
//! engram system, including:
//!
//! - **Lore**: entries, categories, and the merge/feedback mutation rules
//! - **Change log**: per-store append-only sync records
//! - **Wire models**: push, delta, ingest, feedback, and stats bodies
//! - **Store ids**: hierarchical tenant identifiers
//! - **Configuration**: system configuration management
//! - **Error handling**: unified error types
//!

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod change_log;
pub mod config;
pub mod error;
pub mod lore;
pub mod lore_id;
pub mod store_id;
pub mod sync;

// Re-export main types for convenience
pub use change_log::{ChangeLogEntry, ChangeOperation, PushEntry, StagedChange};
pub use config::{
    Config, DedupConfig, EmbeddingsConfig, ServerConfig, SnapshotConfig, StorageConfig,
    WorkerConfig,
};
pub use error::{Error, FieldError, Result, ResultExt};
pub use lore::{EmbeddingStatus, FeedbackType, LoreCategory, LoreDraft, LoreEntry};
pub use lore_id::{generate_lore_id, is_valid_lore_id};
pub use store_id::{StoreId, DEFAULT_STORE_ID};
pub use sync::{
    CreateStoreRequest, DeltaResponse, ExtendedStats, FeedbackItem, FeedbackRequest,
    FeedbackResponse, FeedbackResult, HealthResponse, IngestError, IngestRequest, IngestResponse,
    ListStoresResponse, PushEntryError, PushRequest, PushResponse, QualityBands, SearchMatch,
    SearchRequest, SearchResponse, SkippedFeedback, StoreInfo, StoreStats,
};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
