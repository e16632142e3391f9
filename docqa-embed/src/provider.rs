//! The embedding provider abstraction shared by remote, local and chained providers

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vectors returned by one embedding call.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f16>>,
    pub dimension: usize,
    /// Name of the provider that produced the vectors, when it says so
    pub provider: Option<String>,
}

impl EmbeddingResult {
    /// The dimension is taken from the first vector, or 0 when empty.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Whether vectors carry meaning or only identity.
///
/// Hash vectors are deterministic per text, but unrelated texts are not
/// close to each other. Only identical text scores as similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Semantic,
    HashAffinity,
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingMode::Semantic => f.write_str("semantic"),
            EmbeddingMode::HashAffinity => f.write_str("hash-affinity (degraded)"),
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result.embeddings.into_iter().next().ok_or_else(|| {
            EmbedError::invalid_response(self.provider_name(), "no embedding generated for text")
        })
    }

    /// Embed many texts. The result has one vector per text, in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    fn embedding_dimension(&self) -> usize;

    /// Short name recorded with collections, e.g. `dashscope` or `local`
    fn provider_name(&self) -> &str;

    /// Quality of the vectors this provider currently produces
    fn mode(&self) -> EmbeddingMode {
        EmbeddingMode::Semantic
    }
}

/// Convert f32 vectors to unit-length f16 vectors.
pub(crate) fn normalize_to_f16(embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
    embeddings
        .into_iter()
        .map(|embedding| {
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            embedding
                .into_iter()
                .map(|value| {
                    if norm > 0.0 {
                        f16::from_f32(value / norm)
                    } else {
                        f16::from_f32(value)
                    }
                })
                .collect()
        })
        .collect()
}
