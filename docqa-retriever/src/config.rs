//! Retriever settings resolved from environment-like key/value sources

use crate::error::ConfigError;
use docqa_embed::EmbedConfig;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PERSIST_DIRECTORY: &str = "vectorstore";
pub const DEFAULT_COLLECTION_NAME: &str = "energy_docs";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_RETRIEVAL_K: usize = 3;

/// Everything needed to build a [`VectorStoreManager`](crate::VectorStoreManager)
/// and a [`DocumentProcessor`](crate::DocumentProcessor).
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub persist_directory: PathBuf,
    pub collection_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub embed: EmbedConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            persist_directory: PathBuf::from(DEFAULT_PERSIST_DIRECTORY),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            embed: EmbedConfig::default(),
        }
    }
}

impl RetrieverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from `VECTORSTORE_PATH`, `COLLECTION_NAME`, `CHUNK_SIZE`,
    /// `CHUNK_OVERLAP`, `RETRIEVAL_K` and the embedding keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            persist_directory: get("VECTORSTORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.persist_directory),
            collection_name: get("COLLECTION_NAME").unwrap_or(defaults.collection_name),
            chunk_size: parse_or(get("CHUNK_SIZE"), "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_or(get("CHUNK_OVERLAP"), "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            retrieval_k: parse_or(get("RETRIEVAL_K"), "RETRIEVAL_K", defaults.retrieval_k)?,
            embed: EmbedConfig::from_lookup(&lookup)
                .map_err(|e| ConfigError::new("embedding", e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::new("CHUNK_SIZE", "must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::new(
                "CHUNK_OVERLAP",
                format!("must be smaller than CHUNK_SIZE ({})", self.chunk_size),
            ));
        }
        if self.retrieval_k == 0 {
            return Err(ConfigError::new("RETRIEVAL_K", "must be at least 1"));
        }
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::new("COLLECTION_NAME", "must not be empty"));
        }
        Ok(())
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::new(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}
