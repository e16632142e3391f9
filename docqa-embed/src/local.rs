//! Offline hash-based embeddings

use crate::config::DEFAULT_LOCAL_DIMENSION;
use crate::error::Result;
use crate::provider::{EmbeddingMode, EmbeddingProvider, EmbeddingResult, normalize_to_f16};
use async_trait::async_trait;
use fnv::FnvHasher;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hash::Hasher;

/// Deterministic pseudo-embeddings derived from a hash of the text.
///
/// The same text always maps to the same unit vector, which is enough to
/// round-trip exact content through a vector store without network access.
/// Distances between different texts carry no meaning, so the provider
/// reports [`EmbeddingMode::HashAffinity`].
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_DIMENSION)
    }
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        tracing::warn!(
            dimension,
            "Using local hash embeddings; search results reflect exact-text affinity, not meaning"
        );
        Self {
            dimension: dimension.max(1),
        }
    }

    fn seed(text: &str) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(b"docqa-hash-v1:");
        hasher.write(text.as_bytes());
        hasher.finish()
    }

    fn raw_vector(&self, text: &str) -> Vec<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(Self::seed(text));
        (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..=1.0))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        tracing::debug!(count = texts.len(), "Generating hash embeddings");
        let raw: Vec<Vec<f32>> = texts.iter().map(|t| self.raw_vector(t)).collect();
        Ok(EmbeddingResult::new(normalize_to_f16(raw)).with_provider(self.provider_name()))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    fn mode(&self) -> EmbeddingMode {
        EmbeddingMode::HashAffinity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_deterministic_unit_vectors() {
        let provider = HashEmbeddingProvider::default();
        let texts = vec![
            "Offshore wind capacity".to_string(),
            "Offshore wind capacity".to_string(),
            "Grid storage".to_string(),
        ];

        let result = provider.embed_texts(&texts).await.unwrap();

        assert_eq!(result.dimension, 384);
        assert_eq!(result.embeddings[0], result.embeddings[1]);
        assert_ne!(result.embeddings[0], result.embeddings[2]);

        for embedding in &result.embeddings {
            let norm: f32 = embedding
                .iter()
                .map(|x| x.to_f32() * x.to_f32())
                .sum::<f32>()
                .sqrt();
            assert!((norm - 1.0).abs() < 0.01, "norm was {norm}");
            assert!(embedding.iter().all(|x| (-1.0..=1.0).contains(&x.to_f32())));
        }
    }

    #[tokio::test]
    async fn test_separate_instances_agree() {
        let a = HashEmbeddingProvider::new(16).embed_text("solar").await.unwrap();
        let b = HashEmbeddingProvider::new(16).embed_text("solar").await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_raw_vector_is_one_seeded_stream() {
        let short = HashEmbeddingProvider::new(8).raw_vector("pumped hydro");
        let long = HashEmbeddingProvider::new(32).raw_vector("pumped hydro");

        assert_eq!(short.len(), 8);
        assert_eq!(short[..], long[..8]);
        assert_ne!(short, HashEmbeddingProvider::new(8).raw_vector("pumped hydro "));
    }

    #[tokio::test]
    async fn test_results_name_the_local_provider() {
        let result = HashEmbeddingProvider::new(4)
            .embed_texts(&["tidal".to_string()])
            .await
            .unwrap();
        assert_eq!(result.provider.as_deref(), Some("local"));
    }

    #[test]
    #[traced_test]
    fn test_reports_degraded_mode() {
        let provider = HashEmbeddingProvider::new(8);
        assert_eq!(provider.mode(), EmbeddingMode::HashAffinity);
        assert_eq!(provider.provider_name(), "local");
        assert!(logs_contain("local hash embeddings"));
    }
}
