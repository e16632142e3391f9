//! # docqa-embed
//!
//! Text embeddings for the document QA pipeline. Remote providers speak the
//! OpenAI-compatible `/embeddings` API (DashScope and OpenAI); a deterministic
//! hash provider keeps everything working offline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docqa_embed::{EmbedConfig, EmbeddingProvider, ProviderChain};
//!
//! # async fn example() -> docqa_embed::Result<()> {
//! let chain = ProviderChain::from_config(&EmbedConfig::from_env()?)?;
//!
//! let texts = vec!["Wind power".to_string(), "Solar power".to_string()];
//! let result = chain.embed_texts(&texts).await?;
//!
//! println!("{} embeddings of dimension {} ({})",
//!          result.len(), result.dimension, chain.mode());
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - [`RemoteEmbeddingProvider`]: batches of 25, at most 4 in flight, texts
//!   truncated to 8192 characters. A call fails as a whole if any batch fails.
//! - [`HashEmbeddingProvider`]: offline vectors that only match identical text.
//!   It reports [`EmbeddingMode::HashAffinity`] so callers can flag degraded search.
//! - [`ProviderChain`]: the selected provider with the local provider behind it.
//!
//! All vectors are unit length and stored as `f16`.

pub mod chain;
pub mod config;
pub mod error;
pub mod local;
pub mod provider;
pub mod remote;

pub use chain::{ProviderChain, select_provider};
pub use config::{
    EmbedConfig, EmbedConfigBuilder, FallbackPolicy, ProviderKind, RemoteEndpoint,
    is_usable_credential,
};
pub use error::{EmbedError, Result};
pub use local::HashEmbeddingProvider;
pub use provider::{EmbeddingMode, EmbeddingProvider, EmbeddingResult};
pub use remote::{EmbeddingBackend, OpenAiCompatibleBackend, RemoteEmbeddingProvider};
