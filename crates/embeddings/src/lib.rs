//! Embedding generation for lore entries
//!
//! This crate turns lore content into fixed-length vectors for the
//! similarity and deduplication paths. Providers are remote
//! (OpenAI-compatible API) or deterministic (mock).

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use engram_core::config::EmbeddingsConfig;
use std::sync::Arc;

mod api_provider;
pub mod error;
mod mock_provider;
pub mod provider;

pub use api_provider::OpenAiApiProvider;
pub use error::EmbeddingError;
pub use mock_provider::MockEmbeddingProvider;
pub use provider::EmbeddingProvider;

/// Build an embedding provider from configuration.
///
/// Recognised provider names are `api` (OpenAI-compatible endpoint) and
/// `mock` (deterministic, for tests and offline development).
pub fn create_embedding_provider(
    config: &EmbeddingsConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "api" => Ok(Arc::new(OpenAiApiProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbeddingProvider::new(
            config.embedding_dimension,
        ))),
        other => Err(EmbeddingError::ConfigError(format!(
            "Unsupported embedding provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_mock_provider() {
        let config = EmbeddingsConfig {
            provider: "mock".to_string(),
            embedding_dimension: 12,
            ..Default::default()
        };
        let provider = create_embedding_provider(&config).unwrap();
        assert_eq!(provider.embedding_dimension(), 12);
        assert_eq!(provider.model_name(), "mock");
    }

    #[test]
    fn factory_rejects_unknown_provider() {
        let config = EmbeddingsConfig {
            provider: "quantum".to_string(),
            ..Default::default()
        };
        assert!(create_embedding_provider(&config).is_err());
    }
}
