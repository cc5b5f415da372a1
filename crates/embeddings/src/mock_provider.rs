//! Mock embedding provider for testing

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::EmbeddingError;
use crate::provider::EmbeddingProvider;

/// Deterministic embedding provider for tests and offline development.
///
/// Vectors are derived from a hash of the text and L2-normalized, so the
/// same content always embeds to the same unit vector. Specific contents
/// can be pinned to fixed vectors with [`with_response`](Self::with_response),
/// which is how dedup tests force two texts to collide.
pub struct MockEmbeddingProvider {
    embedding_dim: usize,
    fixtures: HashMap<String, Vec<f32>>,
}

impl MockEmbeddingProvider {
    /// Create a new mock provider with the specified embedding dimension
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            fixtures: HashMap::new(),
        }
    }

    /// Pin a specific text to a fixed vector.
    pub fn with_response(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixtures.insert(text.into(), vector);
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(fixed) = self.fixtures.get(text) {
            return fixed.clone();
        }

        // FNV-1a seed, then a splitmix-style generator per dimension.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            seed ^= u64::from(byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }

        let mut values = Vec::with_capacity(self.embedding_dim);
        let mut state = seed;
        for _ in 0..self.embedding_dim {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^= z >> 31;
            // Map to [-1, 1)
            values.push((z as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32);
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Some(self.vector_for(t))).collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.embedding_dim
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_texts_embed_identically() {
        let provider = MockEmbeddingProvider::new(8);
        let a = provider.embed(vec!["hello".to_string()]).await.unwrap();
        let b = provider.embed(vec!["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn distinct_texts_embed_distinctly() {
        let provider = MockEmbeddingProvider::new(8);
        let out = provider
            .embed(vec!["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let provider = MockEmbeddingProvider::new(16);
        let out = provider.embed(vec!["normalize me".to_string()]).await.unwrap();
        let vec = out[0].as_ref().unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn fixtures_override_hashing() {
        let provider = MockEmbeddingProvider::new(3)
            .with_response("A", vec![1.0, 0.0, 0.0])
            .with_response("A1", vec![1.0, 0.0, 0.0]);
        let out = provider
            .embed(vec!["A".to_string(), "A1".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0], out[1]);
    }
}
