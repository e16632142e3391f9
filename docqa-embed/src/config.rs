//! Configuration for embedding providers
//!
//! Settings are resolved once from an injectable key lookup so that provider
//! selection can be tested without touching the process environment. The
//! builder methods (`with_*`) apply explicit overrides on top of the resolved
//! values, giving the precedence explicit argument > environment > default.

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// DashScope (Aliyun) OpenAI-compatible endpoint.
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
/// OpenAI API endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum number of texts sent in one remote request.
pub const DEFAULT_BATCH_SIZE: usize = 25;
/// Texts longer than this many characters are truncated before sending.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8192;
/// Number of remote batches allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Dimension of the local hash embedder.
pub const DEFAULT_LOCAL_DIMENSION: usize = 384;
/// Consecutive failures after which the chain stays on the fallback provider.
pub const DEFAULT_STICKY_AFTER: u32 = 3;

const PLACEHOLDER_CREDENTIALS: &[&str] = &[
    "your_key",
    "your_api_key",
    "your-api-key",
    "sk-xxx",
    "changeme",
];

/// The embedding backends this crate knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote provider A: DashScope text embeddings
    DashScope,
    /// Remote provider B: OpenAI embeddings
    OpenAi,
    /// Deterministic hash-based local vectors
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::DashScope => "dashscope",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Local => "local",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dashscope" | "aliyun" => Ok(ProviderKind::DashScope),
            "openai" => Ok(ProviderKind::OpenAi),
            "local" | "hash" => Ok(ProviderKind::Local),
            other => Err(EmbedError::invalid_config(format!(
                "unknown embedding provider '{other}' (expected dashscope, openai or local)"
            ))),
        }
    }
}

/// How the provider chain reacts to failures of the selected provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Retry each failed call on the fallback, then go back to the selected provider.
    PerCall,
    /// Like `PerCall`, but after `n` consecutive failures stay on the fallback.
    StickyAfter(u32),
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::StickyAfter(DEFAULT_STICKY_AFTER)
    }
}

/// Connection settings for one OpenAI-compatible embeddings endpoint.
#[derive(Clone, Builder)]
#[builder(setter(into))]
pub struct RemoteEndpoint {
    /// Base URL; `/embeddings` is appended
    pub api_base: String,
    /// Bearer credential
    #[builder(default)]
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    pub model: String,
    /// Expected vector dimension
    pub dimension: usize,
    /// Whether to ask the API for `dimension` explicitly
    #[builder(default)]
    pub request_dimensions: bool,
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("request_dimensions", &self.request_dimensions)
            .finish()
    }
}

impl RemoteEndpoint {
    pub fn builder() -> RemoteEndpointBuilder {
        RemoteEndpointBuilder::default()
    }

    /// DashScope `text-embedding-v3` defaults (1024 dimensions).
    pub fn dashscope() -> Self {
        Self {
            api_base: DASHSCOPE_BASE_URL.to_string(),
            api_key: None,
            model: "text-embedding-v3".to_string(),
            dimension: 1024,
            request_dimensions: false,
        }
    }

    /// OpenAI `text-embedding-3-small` defaults (1536 dimensions).
    pub fn openai() -> Self {
        Self {
            api_base: OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            request_dimensions: false,
        }
    }

    /// Set the API key (builder style)
    pub fn with_api_key(self, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    /// Whether the configured key looks like a real credential.
    pub fn has_usable_credential(&self) -> bool {
        is_usable_credential(self.api_key.as_deref())
    }
}

/// Returns false for missing, blank, or well-known placeholder credentials.
pub fn is_usable_credential(key: Option<&str>) -> bool {
    match key.map(str::trim) {
        None | Some("") => false,
        Some(key) => !PLACEHOLDER_CREDENTIALS
            .iter()
            .any(|placeholder| key.eq_ignore_ascii_case(placeholder)),
    }
}

/// Configuration for the embedding provider chain.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Force a provider instead of probing credentials
    #[builder(default)]
    pub provider: Option<ProviderKind>,
    /// Remote provider A
    #[builder(default = "RemoteEndpoint::dashscope()")]
    pub dashscope: RemoteEndpoint,
    /// Remote provider B
    #[builder(default = "RemoteEndpoint::openai()")]
    pub openai: RemoteEndpoint,
    /// Texts per remote request
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    /// Per-text character ceiling for remote requests
    #[builder(default = "DEFAULT_MAX_INPUT_CHARS")]
    pub max_input_chars: usize,
    /// Remote batches in flight
    #[builder(default = "DEFAULT_MAX_CONCURRENCY")]
    pub max_concurrency: usize,
    /// Dimension of the local fallback vectors
    #[builder(default = "DEFAULT_LOCAL_DIMENSION")]
    pub local_dimension: usize,
    /// Fallback behaviour of the chain
    #[builder(default)]
    pub fallback: FallbackPolicy,
    /// Timeout for a single HTTP request
    #[builder(default = "Duration::from_secs(30)")]
    pub request_timeout: Duration,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: None,
            dashscope: RemoteEndpoint::dashscope(),
            openai: RemoteEndpoint::openai(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            local_dimension: DEFAULT_LOCAL_DIMENSION,
            fallback: FallbackPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup, falling back to defaults.
    ///
    /// Recognised keys: `EMBEDDING_PROVIDER`, `DASHSCOPE_API_KEY` (or
    /// `ALIYUN_API_KEY`), `ALIYUN_BASE_URL`, `DASHSCOPE_EMBEDDING_MODEL`,
    /// `DASHSCOPE_EMBEDDING_DIM`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `OPENAI_EMBEDDING_MODEL`, `OPENAI_EMBEDDING_DIM`, `EMBEDDING_BATCH_SIZE`,
    /// `EMBEDDING_MAX_CHARS`, `EMBEDDING_CONCURRENCY`, `LOCAL_EMBEDDING_DIM`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(provider) = get("EMBEDDING_PROVIDER") {
            config.provider = Some(provider.parse()?);
        }

        config.dashscope.api_key = get("DASHSCOPE_API_KEY").or_else(|| get("ALIYUN_API_KEY"));
        if let Some(base) = get("ALIYUN_BASE_URL") {
            config.dashscope.api_base = base;
        }
        if let Some(model) = get("DASHSCOPE_EMBEDDING_MODEL") {
            config.dashscope.model = model;
        }
        if let Some(dimension) = parse_setting(get("DASHSCOPE_EMBEDDING_DIM"), "DASHSCOPE_EMBEDDING_DIM")? {
            config.dashscope.dimension = dimension;
            config.dashscope.request_dimensions = true;
        }

        config.openai.api_key = get("OPENAI_API_KEY");
        if let Some(base) = get("OPENAI_BASE_URL") {
            config.openai.api_base = base;
        }
        if let Some(model) = get("OPENAI_EMBEDDING_MODEL") {
            config.openai.model = model;
        }
        if let Some(dimension) = parse_setting(get("OPENAI_EMBEDDING_DIM"), "OPENAI_EMBEDDING_DIM")? {
            config.openai.dimension = dimension;
            config.openai.request_dimensions = true;
        }

        if let Some(value) = parse_setting(get("EMBEDDING_BATCH_SIZE"), "EMBEDDING_BATCH_SIZE")? {
            config.batch_size = value;
        }
        if let Some(value) = parse_setting(get("EMBEDDING_MAX_CHARS"), "EMBEDDING_MAX_CHARS")? {
            config.max_input_chars = value;
        }
        if let Some(value) = parse_setting(get("EMBEDDING_CONCURRENCY"), "EMBEDDING_CONCURRENCY")? {
            config.max_concurrency = value;
        }
        if let Some(value) = parse_setting(get("LOCAL_EMBEDDING_DIM"), "LOCAL_EMBEDDING_DIM")? {
            config.local_dimension = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Force a provider (builder style)
    pub fn with_provider(self, provider: ProviderKind) -> Self {
        Self {
            provider: Some(provider),
            ..self
        }
    }

    /// Set the remote batch size (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set the fallback policy (builder style)
    pub fn with_fallback(self, fallback: FallbackPolicy) -> Self {
        Self { fallback, ..self }
    }

    /// Set the local fallback dimension (builder style)
    pub fn with_local_dimension(self, local_dimension: usize) -> Self {
        Self {
            local_dimension,
            ..self
        }
    }

    /// Endpoint settings for a remote provider kind.
    pub fn endpoint(&self, kind: ProviderKind) -> Option<&RemoteEndpoint> {
        match kind {
            ProviderKind::DashScope => Some(&self.dashscope),
            ProviderKind::OpenAi => Some(&self.openai),
            ProviderKind::Local => None,
        }
    }

    /// Reject zero-sized batches, dimensions and concurrency limits.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("batch_size", self.batch_size),
            ("max_input_chars", self.max_input_chars),
            ("max_concurrency", self.max_concurrency),
            ("local_dimension", self.local_dimension),
            ("dashscope.dimension", self.dashscope.dimension),
            ("openai.dimension", self.openai.dimension),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(EmbedError::invalid_config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if let FallbackPolicy::StickyAfter(0) = self.fallback {
            return Err(EmbedError::invalid_config(
                "sticky fallback threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_setting<T>(value: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                EmbedError::invalid_config(format!("{key}='{raw}' could not be parsed: {e}"))
            })
        })
        .transpose()
}
