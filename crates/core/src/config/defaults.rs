//! Default values for configuration fields

use std::path::PathBuf;

pub(super) fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(super) fn default_port() -> u16 {
    7171
}

pub(super) fn default_max_push_entries() -> usize {
    1000
}

pub(super) fn default_delta_default_limit() -> i64 {
    100
}

pub(super) fn default_delta_max_limit() -> i64 {
    1000
}

pub(super) fn default_delete_rate_burst() -> u32 {
    100
}

pub(super) fn default_delete_rate_refill_ms() -> u64 {
    100
}

pub(super) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(super) fn default_idempotency_ttl_hours() -> i64 {
    24
}

pub(super) fn default_max_connections() -> u32 {
    8
}

pub(super) fn default_embedding_provider() -> String {
    "api".to_string()
}

pub(super) fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}

pub(super) fn default_embedding_dimension() -> usize {
    384
}

pub(super) fn default_texts_per_api_request() -> usize {
    32
}

pub(super) fn default_max_concurrent_api_requests() -> usize {
    4
}

pub(super) fn default_embedding_retry_attempts() -> usize {
    3
}

pub(super) fn default_dedup_enabled() -> bool {
    true
}

pub(super) fn default_dedup_threshold() -> f32 {
    0.92
}

pub(super) fn default_worker_poll_interval_ms() -> u64 {
    1000
}

pub(super) fn default_worker_batch_size() -> usize {
    32
}

pub(super) fn default_worker_backoff_initial_ms() -> u64 {
    500
}

pub(super) fn default_worker_backoff_max_ms() -> u64 {
    60_000
}

pub(super) fn default_snapshot_enabled() -> bool {
    true
}

pub(super) fn default_snapshot_interval_secs() -> u64 {
    3600
}

pub(super) fn default_snapshot_compaction_enabled() -> bool {
    false
}
