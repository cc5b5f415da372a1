//! Trait definition for embedding providers

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Trait for embedding providers
///
/// This trait defines the interface that all embedding providers must
/// implement, whether remote (API-based) or deterministic (mock).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a list of texts
    ///
    /// # Arguments
    /// * `texts` - List of text strings to embed
    ///
    /// # Returns
    /// One entry per input text, in order. `None` marks a text the
    /// provider permanently refused (for example, one exceeding the model
    /// context window); callers should not retry those.
    async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError>;

    /// Get the embedding dimension produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Model identifier reported in health output
    fn model_name(&self) -> &str;

    /// Probe the backing service at startup. Never blocks startup: a
    /// failing probe only warns.
    async fn check_health(&self) {}
}
