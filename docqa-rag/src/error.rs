//! Error types for question answering

use docqa_retriever::{ConfigError, DocumentProcessingError, VectorStoreError};

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Failures of the chat model client.
///
/// `Configuration` and `Connection` mean the model could not be reached at
/// all; `Generation` means it answered with something unusable.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM configuration error: {message}")]
    Configuration { message: String },

    #[error("Could not reach {provider}: {message}")]
    Connection { provider: String, message: String },

    #[error("{provider} failed to generate an answer: {message}")]
    Generation { provider: String, message: String },
}

impl LlmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn generation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True when the model was never reached, as opposed to answering badly.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Connection { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Orchestration was used out of order
    #[error("QA chain error: {message}")]
    Chain { message: String },

    /// Nothing has been ingested yet
    #[error("No collection '{collection}' exists yet; ingest documents first")]
    IndexNotFound { collection: String },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Document processing error: {0}")]
    Document(#[from] DocumentProcessingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl RagError {
    pub fn chain(message: impl Into<String>) -> Self {
        Self::Chain {
            message: message.into(),
        }
    }

    pub fn index_not_found(collection: impl Into<String>) -> Self {
        Self::IndexNotFound {
            collection: collection.into(),
        }
    }
}
