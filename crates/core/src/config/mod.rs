//! Configuration module for the engram server.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides (`ENGRAM_SERVER__PORT=8080` style). Every field has a serde
//! default, so an empty file is a valid configuration.

mod defaults;
mod loading;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use defaults::*;

/// Main configuration structure for the engram server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Store storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embeddings configuration
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Ingest deduplication configuration
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Embedding worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Snapshot generation configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer key required on authenticated routes. When unset, the
    /// server refuses to start authenticated routes in release setups.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum entries accepted in a single push
    #[serde(default = "default_max_push_entries")]
    pub max_push_entries: usize,

    /// Delta page size when the client does not pass `limit`
    #[serde(default = "default_delta_default_limit")]
    pub delta_default_limit: i64,

    /// Hard cap on the delta page size
    #[serde(default = "default_delta_max_limit")]
    pub delta_max_limit: i64,

    /// Token-bucket burst for DELETE endpoints
    #[serde(default = "default_delete_rate_burst")]
    pub delete_rate_burst: u32,

    /// Token-bucket refill period for DELETE endpoints, in milliseconds
    #[serde(default = "default_delete_rate_refill_ms")]
    pub delete_rate_refill_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            max_push_entries: default_max_push_entries(),
            delta_default_limit: default_delta_default_limit(),
            delta_max_limit: default_delta_max_limit(),
            delete_rate_burst: default_delete_rate_burst(),
            delete_rate_refill_ms: default_delete_rate_refill_ms(),
        }
    }
}

/// Store storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// TTL of cached push responses
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: i64,

    /// SQLite pool size per store
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
            max_connections: default_max_connections(),
        }
    }
}

/// Configuration for embeddings generation
///
/// # Providers
/// - `api` (default): OpenAI-compatible `/v1/embeddings` endpoint
/// - `mock`: deterministic provider for tests and offline development
#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider type: "api" (default), "mock"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API base URL for the api provider
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// API key for authentication (or use EMBEDDING_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Embedding dimension size
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Number of texts sent in a single embedding API request
    #[serde(default = "default_texts_per_api_request")]
    pub texts_per_api_request: usize,

    /// Maximum concurrent embedding API requests
    #[serde(default = "default_max_concurrent_api_requests")]
    pub max_concurrent_api_requests: usize,

    /// Number of retry attempts for failed embedding requests
    #[serde(default = "default_embedding_retry_attempts")]
    pub retry_attempts: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_base_url: None,
            api_key: None,
            embedding_dimension: default_embedding_dimension(),
            texts_per_api_request: default_texts_per_api_request(),
            max_concurrent_api_requests: default_max_concurrent_api_requests(),
            retry_attempts: default_embedding_retry_attempts(),
        }
    }
}

impl std::fmt::Debug for EmbeddingsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingsConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("embedding_dimension", &self.embedding_dimension)
            .field("texts_per_api_request", &self.texts_per_api_request)
            .field(
                "max_concurrent_api_requests",
                &self.max_concurrent_api_requests,
            )
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

/// Ingest deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_enabled")]
    pub enabled: bool,

    /// Cosine similarity at or above which an ingested entry is merged
    /// into its nearest neighbour instead of inserted
    #[serde(default = "default_dedup_threshold")]
    pub threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: default_dedup_enabled(),
            threshold: default_dedup_threshold(),
        }
    }
}

/// Embedding worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between polls when the pending queue is empty
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pending entries fetched per batch
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: usize,

    /// First backoff delay after a retryable provider failure
    #[serde(default = "default_worker_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_worker_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_worker_poll_interval_ms(),
            batch_size: default_worker_batch_size(),
            backoff_initial_ms: default_worker_backoff_initial_ms(),
            backoff_max_ms: default_worker_backoff_max_ms(),
        }
    }
}

/// Snapshot generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_enabled")]
    pub enabled: bool,

    /// Interval between periodic snapshot generations per store
    #[serde(default = "default_snapshot_interval_secs")]
    pub interval_secs: u64,

    /// Compact each store's change log after a successful snapshot.
    /// Clients behind the compaction horizon must re-bootstrap, so this
    /// is off unless the deployment wants bounded log growth.
    #[serde(default = "default_snapshot_compaction_enabled")]
    pub compaction_enabled: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: default_snapshot_enabled(),
            interval_secs: default_snapshot_interval_secs(),
            compaction_enabled: default_snapshot_compaction_enabled(),
        }
    }
}
