//! Provider selection and the remote-then-local fallback chain

use crate::config::{EmbedConfig, FallbackPolicy, ProviderKind};
use crate::error::{EmbedError, Result};
use crate::local::HashEmbeddingProvider;
use crate::provider::{EmbeddingMode, EmbeddingProvider, EmbeddingResult};
use crate::remote::RemoteEmbeddingProvider;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Decide which provider to use from configuration alone.
///
/// An explicit override wins; forcing a remote provider that has no usable
/// credential is a configuration error rather than a silent downgrade.
/// Otherwise DashScope, then OpenAI, then the local hash provider.
pub fn select_provider(config: &EmbedConfig) -> Result<ProviderKind> {
    if let Some(kind) = config.provider {
        if let Some(endpoint) = config.endpoint(kind) {
            if !endpoint.has_usable_credential() {
                return Err(EmbedError::invalid_config(format!(
                    "embedding provider '{kind}' was requested but no usable API key is configured"
                )));
            }
        }
        return Ok(kind);
    }

    let kind = [ProviderKind::DashScope, ProviderKind::OpenAi]
        .into_iter()
        .find(|kind| {
            config
                .endpoint(*kind)
                .is_some_and(|endpoint| endpoint.has_usable_credential())
        })
        .unwrap_or(ProviderKind::Local);
    Ok(kind)
}

/// Ordered attempt list: the selected provider, then the local fallback.
pub struct ProviderChain {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
    policy: FallbackPolicy,
    consecutive_failures: AtomicU32,
    sticky: AtomicBool,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("primary", &self.primary.provider_name())
            .field(
                "fallback",
                &self.fallback.as_ref().map(|p| p.provider_name().to_string()),
            )
            .field("policy", &self.policy)
            .field("on_fallback", &self.is_on_fallback())
            .finish()
    }
}

impl ProviderChain {
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
            consecutive_failures: AtomicU32::new(0),
            sticky: AtomicBool::new(false),
        }
    }

    /// Build the chain for whatever [`select_provider`] picks.
    pub fn from_config(config: &EmbedConfig) -> Result<Self> {
        config.validate()?;
        let kind = select_provider(config)?;
        let local: Arc<dyn EmbeddingProvider> =
            Arc::new(HashEmbeddingProvider::new(config.local_dimension));

        if kind == ProviderKind::Local {
            tracing::info!("No remote embedding credentials found, using local embeddings");
            return Ok(Self::new(local, None, config.fallback));
        }

        let remote = RemoteEmbeddingProvider::from_config(kind, config)?;
        tracing::info!(
            provider = %kind,
            dimension = remote.embedding_dimension(),
            "Selected remote embedding provider"
        );
        Ok(Self::new(Arc::new(remote), Some(local), config.fallback))
    }

    /// True once the chain has permanently switched to its fallback.
    pub fn is_on_fallback(&self) -> bool {
        self.fallback.is_some() && self.sticky.load(Ordering::Acquire)
    }

    fn active(&self) -> &Arc<dyn EmbeddingProvider> {
        match &self.fallback {
            Some(fallback) if self.sticky.load(Ordering::Acquire) => fallback,
            _ => &self.primary,
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if let FallbackPolicy::StickyAfter(threshold) = self.policy {
            if failures >= threshold && !self.sticky.swap(true, Ordering::AcqRel) {
                tracing::warn!(
                    provider = self.primary.provider_name(),
                    failures,
                    "Embedding provider keeps failing, staying on local fallback"
                );
            }
        }
    }
}

fn attempt(provider: &dyn EmbeddingProvider, error: &EmbedError) -> String {
    format!("{}: {error}", provider.provider_name())
}

/// Stamp the result with the provider that produced it unless it already says.
fn produced_by(mut result: EmbeddingResult, provider: &dyn EmbeddingProvider) -> EmbeddingResult {
    if result.provider.is_none() {
        result.provider = Some(provider.provider_name().to_string());
    }
    result
}

#[async_trait]
impl EmbeddingProvider for ProviderChain {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if let Some(fallback) = self.fallback.as_ref().filter(|_| self.is_on_fallback()) {
            return fallback
                .embed_texts(texts)
                .await
                .map(|result| produced_by(result, fallback.as_ref()))
                .map_err(|e| EmbedError::ProvidersExhausted {
                    attempts: vec![attempt(fallback.as_ref(), &e)],
                });
        }

        let primary_error = match self.primary.embed_texts(texts).await {
            Ok(result) => {
                self.consecutive_failures.store(0, Ordering::Release);
                return Ok(produced_by(result, self.primary.as_ref()));
            }
            Err(e) => e,
        };
        let mut attempts = vec![attempt(self.primary.as_ref(), &primary_error)];

        let Some(fallback) = &self.fallback else {
            return Err(EmbedError::ProvidersExhausted { attempts });
        };

        tracing::warn!(
            provider = self.primary.provider_name(),
            error = %primary_error,
            fallback = fallback.provider_name(),
            "Embedding failed, retrying with fallback provider"
        );
        self.record_failure();

        match fallback.embed_texts(texts).await {
            Ok(result) => Ok(produced_by(result, fallback.as_ref())),
            Err(e) => {
                attempts.push(attempt(fallback.as_ref(), &e));
                Err(EmbedError::ProvidersExhausted { attempts })
            }
        }
    }

    fn embedding_dimension(&self) -> usize {
        self.active().embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        self.active().provider_name()
    }

    fn mode(&self) -> EmbeddingMode {
        self.active().mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteEndpoint;
    use half::f16;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls, then succeeds with 2-d vectors.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EmbedError::Api {
                    provider: "flaky".to_string(),
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(EmbeddingResult::new(
                texts.iter().map(|_| vec![f16::ONE, f16::ZERO]).collect(),
            ))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    fn texts() -> Vec<String> {
        vec!["solar".to_string()]
    }

    #[test]
    fn test_selection_priority() {
        let config = EmbedConfig::default();
        assert_eq!(select_provider(&config).unwrap(), ProviderKind::Local);

        let mut config = EmbedConfig::default();
        config.openai = RemoteEndpoint::openai().with_api_key("sk-openai");
        assert_eq!(select_provider(&config).unwrap(), ProviderKind::OpenAi);

        config.dashscope = RemoteEndpoint::dashscope().with_api_key("sk-dash");
        assert_eq!(select_provider(&config).unwrap(), ProviderKind::DashScope);

        config.dashscope = RemoteEndpoint::dashscope().with_api_key("your_key");
        assert_eq!(select_provider(&config).unwrap(), ProviderKind::OpenAi);
    }

    #[test]
    fn test_explicit_override() {
        let mut config = EmbedConfig::default().with_provider(ProviderKind::Local);
        config.dashscope = RemoteEndpoint::dashscope().with_api_key("sk-dash");
        assert_eq!(select_provider(&config).unwrap(), ProviderKind::Local);

        let config = EmbedConfig::default().with_provider(ProviderKind::OpenAi);
        assert!(select_provider(&config).unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_local_only_chain() {
        let chain = ProviderChain::from_config(&EmbedConfig::default().with_local_dimension(32))
            .unwrap();

        assert!(chain.fallback.is_none());
        assert_eq!(chain.provider_name(), "local");
        assert_eq!(chain.mode(), EmbeddingMode::HashAffinity);
        let result = chain.embed_texts(&texts()).await.unwrap();
        assert_eq!(result.dimension, 32);
    }

    #[tokio::test]
    async fn test_per_call_fallback_returns_to_primary() {
        let primary = FlakyProvider::failing(5);
        let chain = ProviderChain::new(
            primary.clone(),
            Some(Arc::new(HashEmbeddingProvider::new(4))),
            FallbackPolicy::PerCall,
        );

        for _ in 0..5 {
            let result = chain.embed_texts(&texts()).await.unwrap();
            assert_eq!(result.dimension, 4);
        }
        assert!(!chain.is_on_fallback());

        let result = chain.embed_texts(&texts()).await.unwrap();
        assert_eq!(result.dimension, 2);
        assert_eq!(primary.calls(), 6);
    }

    #[tokio::test]
    async fn test_result_names_the_provider_that_answered() {
        let chain = ProviderChain::new(
            FlakyProvider::failing(1),
            Some(Arc::new(HashEmbeddingProvider::new(4))),
            FallbackPolicy::PerCall,
        );

        let degraded = chain.embed_texts(&texts()).await.unwrap();
        assert_eq!(degraded.provider.as_deref(), Some("local"));
        assert_eq!(chain.provider_name(), "flaky");

        let recovered = chain.embed_texts(&texts()).await.unwrap();
        assert_eq!(recovered.provider.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn test_sticky_after_consecutive_failures() {
        let primary = FlakyProvider::failing(3);
        let chain = ProviderChain::new(
            primary.clone(),
            Some(Arc::new(HashEmbeddingProvider::new(4))),
            FallbackPolicy::StickyAfter(3),
        );
        assert_eq!(chain.provider_name(), "flaky");

        for _ in 0..3 {
            chain.embed_texts(&texts()).await.unwrap();
        }
        assert!(chain.is_on_fallback());
        assert_eq!(chain.provider_name(), "local");
        assert_eq!(chain.embedding_dimension(), 4);

        chain.embed_texts(&texts()).await.unwrap();
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let primary = FlakyProvider::failing(2);
        let chain = ProviderChain::new(
            primary.clone(),
            Some(Arc::new(HashEmbeddingProvider::new(4))),
            FallbackPolicy::StickyAfter(3),
        );

        for _ in 0..4 {
            chain.embed_texts(&texts()).await.unwrap();
        }
        assert!(!chain.is_on_fallback());
        assert_eq!(chain.consecutive_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_attempt_failing_is_exhausted() {
        let chain = ProviderChain::new(
            FlakyProvider::failing(usize::MAX),
            Some(FlakyProvider::failing(usize::MAX)),
            FallbackPolicy::PerCall,
        );

        match chain.embed_texts(&texts()).await.unwrap_err() {
            EmbedError::ProvidersExhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
