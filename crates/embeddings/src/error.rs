//! Error types for the embeddings module

use std::fmt;

/// Errors that can occur during embedding operations.
///
/// The worker and the dedup path care about one distinction: whether a
/// failure is worth retrying later ([`is_retryable`](Self::is_retryable))
/// or the entry should be marked permanently failed.
#[derive(Debug)]
pub enum EmbeddingError {
    /// Configuration error
    ConfigError(String),

    /// Transport-level failure (connect, timeout, TLS)
    Transport(String),

    /// The provider rejected the request for capacity reasons
    RateLimited(String),

    /// The provider reported a server-side fault (5xx-equivalent)
    ProviderUnavailable(String),

    /// The provider rejected the request permanently (bad input, auth)
    InferenceError(String),

    /// Response vector length did not match the configured dimension
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// True when a later retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited(_) | Self::ProviderUnavailable(_)
        )
    }
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "Transport failure: {msg}"),
            Self::RateLimited(msg) => write!(f, "Rate limited: {msg}"),
            Self::ProviderUnavailable(msg) => write!(f, "Provider unavailable: {msg}"),
            Self::InferenceError(msg) => write!(f, "Inference failed: {msg}"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for EmbeddingError {}

impl From<EmbeddingError> for engram_core::error::Error {
    fn from(err: EmbeddingError) -> Self {
        if err.is_retryable() {
            engram_core::error::Error::EmbeddingUnavailable(err.to_string())
        } else {
            engram_core::error::Error::Embedding(err.to_string())
        }
    }
}
