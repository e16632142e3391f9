//! Remote embedding providers speaking the OpenAI-compatible `/embeddings` API
//!
//! Both DashScope (compatible mode) and OpenAI accept the same request shape,
//! so a single [`OpenAiCompatibleBackend`] serves both. Batching, truncation
//! and bounded concurrency live in [`RemoteEmbeddingProvider`], which talks to
//! any [`EmbeddingBackend`] so it can be exercised without a network.

use crate::config::{EmbedConfig, ProviderKind, RemoteEndpoint};
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, normalize_to_f16};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A single request/response exchange with an embedding service.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one batch. The result must contain one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// HTTP backend for OpenAI-compatible embedding endpoints.
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    provider: String,
    url: String,
    api_key: String,
    model: String,
    request_dimensions: Option<usize>,
}

impl std::fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatibleBackend {
    pub fn new(
        provider: impl Into<String>,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> Result<Self> {
        let provider = provider.into();
        let api_key = endpoint
            .api_key
            .clone()
            .filter(|_| endpoint.has_usable_credential())
            .ok_or_else(|| {
                EmbedError::invalid_config(format!("{provider} requires a usable API key"))
            })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::request(provider.clone(), e))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.api_base.trim_end_matches('/')),
            api_key,
            model: endpoint.model.clone(),
            request_dimensions: endpoint.request_dimensions.then_some(endpoint.dimension),
            provider,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiCompatibleBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            provider = %self.provider,
            model = %self.model,
            batch_size = texts.len(),
            "Embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider, error = %e, "Embedding request failed");
                EmbedError::request(self.provider.clone(), e)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedError::request(self.provider.clone(), e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            tracing::warn!(provider = %self.provider, %status, "Embedding API error");
            return Err(EmbedError::Api {
                provider: self.provider.clone(),
                status: status.as_u16(),
                message,
            });
        }

        parse_embedding_response(&self.provider, &body, texts.len())
    }
}

/// Decode an embeddings response body, restoring input order by `index`.
pub fn parse_embedding_response(
    provider: &str,
    body: &str,
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| EmbedError::invalid_response(provider, format!("malformed body: {e}")))?;

    let mut data = response.data;
    if data.len() != expected {
        return Err(EmbedError::invalid_response(
            provider,
            format!("expected {expected} embeddings, got {}", data.len()),
        ));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

/// Batched, truncating, concurrency-bounded provider over an [`EmbeddingBackend`].
///
/// A call succeeds only if every batch succeeds; partial results are never
/// returned.
pub struct RemoteEmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    name: String,
    dimension: usize,
    batch_size: usize,
    max_input_chars: usize,
    max_concurrency: usize,
}

impl std::fmt::Debug for RemoteEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbeddingProvider")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("max_input_chars", &self.max_input_chars)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl RemoteEmbeddingProvider {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn EmbeddingBackend>,
        dimension: usize,
    ) -> Self {
        let defaults = EmbedConfig::default();
        Self {
            backend,
            name: name.into(),
            dimension,
            batch_size: defaults.batch_size,
            max_input_chars: defaults.max_input_chars,
            max_concurrency: defaults.max_concurrency,
        }
    }

    /// Build the HTTP-backed provider for a remote `kind`.
    pub fn from_config(kind: ProviderKind, config: &EmbedConfig) -> Result<Self> {
        let endpoint = config.endpoint(kind).ok_or_else(|| {
            EmbedError::invalid_config(format!("{kind} is not a remote embedding provider"))
        })?;
        let backend = OpenAiCompatibleBackend::new(kind.as_str(), endpoint, config.request_timeout)?;

        Ok(Self::new(kind.as_str(), Arc::new(backend), endpoint.dimension)
            .with_batch_size(config.batch_size)
            .with_max_input_chars(config.max_input_chars)
            .with_max_concurrency(config.max_concurrency))
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    pub fn with_max_input_chars(self, max_input_chars: usize) -> Self {
        Self {
            max_input_chars: max_input_chars.max(1),
            ..self
        }
    }

    pub fn with_max_concurrency(self, max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            ..self
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]).with_provider(&self.name));
        }

        let prepared: Vec<String> = texts
            .iter()
            .map(|text| truncate_chars(text, self.max_input_chars))
            .collect();
        let truncated = prepared
            .iter()
            .zip(texts)
            .filter(|(prepared, original)| prepared.len() != original.len())
            .count();
        if truncated > 0 {
            tracing::warn!(
                provider = %self.name,
                truncated,
                max_chars = self.max_input_chars,
                "Truncated oversized texts before embedding"
            );
        }

        let batches: Vec<Vec<String>> = prepared
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        tracing::debug!(
            provider = %self.name,
            texts = texts.len(),
            batches = batches.len(),
            "Generating remote embeddings"
        );

        let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| {
                let backend = Arc::clone(&self.backend);
                let name = self.name.clone();
                async move {
                    let vectors = backend.embed_batch(&batch).await?;
                    if vectors.len() != batch.len() {
                        return Err(EmbedError::invalid_response(
                            name,
                            format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
                        ));
                    }
                    Ok(vectors)
                }
            })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = per_batch.into_iter().flatten().collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbedError::DimensionMismatch {
                provider: self.name.clone(),
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        Ok(EmbeddingResult::new(normalize_to_f16(vectors)).with_provider(&self.name))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Encodes the number in "text-{n}" as an angle so order survives normalization.
    #[derive(Default)]
    struct RecordingBackend {
        batches: Mutex<Vec<Vec<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.to_vec());
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(marker) = &self.fail_on {
                if texts.iter().any(|t| t == marker) {
                    return Err(EmbedError::Api {
                        provider: "fake".to_string(),
                        status: 500,
                        message: "boom".to_string(),
                    });
                }
            }

            Ok(texts
                .iter()
                .map(|t| {
                    let n: f32 = t
                        .strip_prefix("text-")
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0.0);
                    let angle = n * 0.01;
                    vec![angle.cos(), angle.sin()]
                })
                .collect())
        }
    }

    fn texts(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("text-{i}")).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let backend = Arc::new(RecordingBackend::default());
        let provider = RemoteEmbeddingProvider::new("fake", backend.clone(), 2)
            .with_batch_size(25)
            .with_max_concurrency(4);

        let result = provider.embed_texts(&texts(60)).await.unwrap();

        assert_eq!(result.len(), 60);
        let sizes: Vec<usize> = backend.batches.lock().unwrap().iter().map(Vec::len).collect();
        let mut sorted_sizes = sizes.clone();
        sorted_sizes.sort_unstable();
        assert_eq!(sorted_sizes, vec![10, 25, 25]);

        for pair in result.embeddings.windows(2) {
            assert!(pair[0][1].to_f32() < pair[1][1].to_f32());
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let backend = Arc::new(RecordingBackend::default());
        let provider = RemoteEmbeddingProvider::new("fake", backend.clone(), 2)
            .with_batch_size(1)
            .with_max_concurrency(2);

        provider.embed_texts(&texts(8)).await.unwrap();

        assert_eq!(backend.batches.lock().unwrap().len(), 8);
        assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_whole_call() {
        let backend = Arc::new(RecordingBackend {
            fail_on: Some("text-30".to_string()),
            ..Default::default()
        });
        let provider = RemoteEmbeddingProvider::new("fake", backend, 2).with_batch_size(25);

        let err = provider.embed_texts(&texts(60)).await.unwrap_err();
        assert!(matches!(err, EmbedError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_unexpected_dimension_is_rejected() {
        let backend = Arc::new(RecordingBackend::default());
        let provider = RemoteEmbeddingProvider::new("fake", backend, 3);

        let err = provider.embed_texts(&texts(2)).await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_long_texts_are_truncated() {
        let backend = Arc::new(RecordingBackend::default());
        let provider =
            RemoteEmbeddingProvider::new("fake", backend.clone(), 2).with_max_input_chars(5);

        let long = "風力發電量持續增長".to_string();
        provider.embed_texts(&[long]).await.unwrap();

        let batches = backend.batches.lock().unwrap();
        assert_eq!(batches[0][0], "風力發電量");
        assert!(logs_contain("Truncated oversized texts"));
    }

    #[tokio::test]
    async fn test_empty_input_skips_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let provider = RemoteEmbeddingProvider::new("fake", backend.clone(), 2);

        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_response_reorders_by_index() {
        let body = r#"{"data":[
            {"embedding":[0.0,1.0],"index":1},
            {"embedding":[1.0,0.0],"index":0}
        ]}"#;
        let vectors = parse_embedding_response("openai", body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_response_rejects_wrong_count_and_garbage() {
        let body = r#"{"data":[{"embedding":[1.0],"index":0}]}"#;
        let err = parse_embedding_response("openai", body, 2).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse { .. }));

        let err = parse_embedding_response("openai", "not json", 1).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse { .. }));
    }

    #[test]
    fn test_backend_requires_usable_key() {
        let endpoint = RemoteEndpoint::openai().with_api_key("your_api_key");
        let err = OpenAiCompatibleBackend::new("openai", &endpoint, Duration::from_secs(1))
            .unwrap_err();
        assert!(err.is_config());

        let endpoint = RemoteEndpoint::openai().with_api_key("sk-test");
        let backend =
            OpenAiCompatibleBackend::new("openai", &endpoint, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url, "https://api.openai.com/v1/embeddings");
    }
}
