//! OpenAI-compatible API provider for embeddings (vLLM, OpenAI, etc.)

use crate::{error::EmbeddingError, provider::EmbeddingProvider};
use async_openai::error::OpenAIError;
use async_openai::types::{CreateEmbeddingRequest, EmbeddingInput};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use engram_core::config::EmbeddingsConfig;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Maximum characters per individual text. Treating 1 char = 1 token to be
/// safe against context overflow; longer texts are skipped, not truncated.
const MAX_TEXT_CHARS: usize = 8192;

/// OpenAI-compatible API provider
pub struct OpenAiApiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_concurrent: usize,
    concurrency_limiter: Arc<Semaphore>,
    retry_attempts: usize,
}

impl OpenAiApiProvider {
    /// Create a new API provider from configuration
    pub fn new(config: &EmbeddingsConfig) -> Result<Self, EmbeddingError> {
        if config.embedding_dimension == 0 {
            return Err(EmbeddingError::ConfigError(
                "embedding_dimension must be positive".to_string(),
            ));
        }
        if config.texts_per_api_request == 0 {
            return Err(EmbeddingError::ConfigError(
                "texts_per_api_request must be positive".to_string(),
            ));
        }

        let base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:8000/v1".to_string());

        info!("Initializing OpenAI-compatible API embeddings");
        info!("  Model: {}", config.model);
        info!("  Dimensions: {}", config.embedding_dimension);
        info!("  Base URL: {base_url}");
        info!("  Batch size: {}", config.texts_per_api_request);
        info!("  Retry attempts: {}", config.retry_attempts);

        let mut openai_config = OpenAIConfig::new().with_api_base(base_url.as_str());
        if let Some(ref api_key) = config.api_key {
            openai_config = openai_config.with_api_key(api_key.clone());
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            dimensions: config.embedding_dimension,
            batch_size: config.texts_per_api_request,
            max_concurrent: config.max_concurrent_api_requests,
            concurrency_limiter: Arc::new(Semaphore::new(config.max_concurrent_api_requests)),
            retry_attempts: config.retry_attempts,
        })
    }
}

/// Map a client error onto the retryable/permanent taxonomy.
fn classify_error(err: &OpenAIError) -> EmbeddingError {
    match err {
        OpenAIError::Reqwest(e) => EmbeddingError::Transport(e.to_string()),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or("");
            if kind.contains("rate_limit") || api.message.contains("rate limit") {
                EmbeddingError::RateLimited(api.message.clone())
            } else if kind.contains("server_error")
                || kind.contains("overloaded")
                || kind.contains("unavailable")
            {
                EmbeddingError::ProviderUnavailable(api.message.clone())
            } else {
                EmbeddingError::InferenceError(api.message.clone())
            }
        }
        other => EmbeddingError::InferenceError(other.to_string()),
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiApiProvider {
    async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = vec![None; texts.len()];

        // Texts over the per-text limit are skipped and stay None.
        let mut skipped = 0;
        let eligible: Vec<(usize, String)> = texts
            .into_iter()
            .enumerate()
            .filter(|(i, text)| {
                if text.chars().count() <= MAX_TEXT_CHARS {
                    true
                } else {
                    skipped += 1;
                    debug!("Text at index {i} exceeds {MAX_TEXT_CHARS} chars, skipping");
                    false
                }
            })
            .collect();

        if skipped > 0 {
            warn!("Skipped {skipped} texts exceeding {MAX_TEXT_CHARS} chars");
        }
        if eligible.is_empty() {
            return Ok(all_embeddings);
        }

        let batches: Vec<Vec<(usize, String)>> = eligible
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let results = stream::iter(batches)
            .map(|batch| {
                let limiter = self.concurrency_limiter.clone();
                let client = self.client.clone();
                let model = self.model.clone();
                let dimensions = self.dimensions;
                let retry_attempts = self.retry_attempts;

                async move {
                    let (indices, batch_texts): (Vec<usize>, Vec<String>) =
                        batch.into_iter().unzip();

                    let _permit = limiter.acquire_owned().await.map_err(|e| {
                        EmbeddingError::ProviderUnavailable(format!(
                            "Failed to acquire concurrency permit: {e}"
                        ))
                    })?;

                    let mut attempt = 0;
                    loop {
                        let request = CreateEmbeddingRequest {
                            model: model.clone(),
                            input: EmbeddingInput::StringArray(batch_texts.clone()),
                            encoding_format: None,
                            dimensions: None,
                            user: None,
                        };

                        match client.embeddings().create(request).await {
                            Ok(response) => {
                                let mut sorted: Vec<(usize, Vec<f32>)> = response
                                    .data
                                    .into_iter()
                                    .map(|emb| (emb.index as usize, emb.embedding))
                                    .collect();
                                sorted.sort_by_key(|(idx, _)| *idx);

                                for (_, embedding) in &sorted {
                                    if embedding.len() != dimensions {
                                        return Err(EmbeddingError::DimensionMismatch {
                                            expected: dimensions,
                                            actual: embedding.len(),
                                        });
                                    }
                                }

                                let pairs: Vec<(usize, Vec<f32>)> = indices
                                    .into_iter()
                                    .zip(sorted.into_iter().map(|(_, emb)| emb))
                                    .collect();
                                return Ok::<_, EmbeddingError>(pairs);
                            }
                            Err(e) => {
                                let classified = classify_error(&e);
                                if classified.is_retryable() && attempt < retry_attempts {
                                    attempt += 1;
                                    let backoff_ms =
                                        (500u64 * 2u64.pow(attempt as u32 - 1)).min(8_000);
                                    warn!(
                                        "Embedding request failed ({classified}), retrying in \
                                         {backoff_ms}ms (attempt {attempt}/{retry_attempts})"
                                    );
                                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                                    continue;
                                }
                                return Err(classified);
                            }
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrent.max(1))
            .collect::<Vec<_>>()
            .await;

        for result in results {
            for (orig_idx, embedding) in result? {
                all_embeddings[orig_idx] = Some(embedding);
            }
        }

        Ok(all_embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn check_health(&self) {
        debug!("Checking API health via /v1/models endpoint");
        match self.client.models().list().await {
            Ok(models) => {
                info!("API health check passed");
                debug!("  Available models: {}", models.data.len());
            }
            Err(e) => {
                warn!("API health check failed: {e}");
                warn!("  The embedding service may not be running or still starting up.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimension_config() {
        let config = EmbeddingsConfig {
            embedding_dimension: 0,
            ..Default::default()
        };
        assert!(OpenAiApiProvider::new(&config).is_err());
    }

    #[test]
    fn api_error_classification() {
        let rate_limited = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "rate limit exceeded".to_string(),
            r#type: Some("rate_limit_exceeded".to_string()),
            param: None,
            code: None,
        });
        assert!(classify_error(&rate_limited).is_retryable());

        let bad_request = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "invalid model".to_string(),
            r#type: Some("invalid_request_error".to_string()),
            param: None,
            code: None,
        });
        assert!(!classify_error(&bad_request).is_retryable());
    }
}
