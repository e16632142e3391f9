//! Error types for document processing and the vector store

use docqa_embed::EmbedError;
use std::path::PathBuf;

/// Failure to turn a path into documents.
#[derive(Debug, thiserror::Error)]
pub enum DocumentProcessingError {
    #[error("Path does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Unsupported file type '{extension}' for {} (supported: .pdf, .txt, .doc, .docx)", path.display())]
    UnsupportedExtension { path: PathBuf, extension: String },

    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// A format loader failed; the loader's error is kept as the source
    #[error("Failed to load {}: {source}", path.display())]
    Loader {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid chunking parameters: {0}")]
    InvalidChunking(#[from] docqa_context::SplitterError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DocumentProcessingError {
    pub fn loader(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Self::Loader {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a vector store operation.
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    /// An operation needed a loaded or created collection
    #[error("No active collection; create or load one first")]
    NoActiveCollection,

    #[error("k must be at least 1 (got {k})")]
    InvalidK { k: usize },

    /// Vectors of a different dimension cannot join an existing collection
    #[error("Collection '{collection}' stores {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Index backend failure, with what we were doing at the time
    #[error("Failed to {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VectorStoreError {
    pub fn storage(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Invalid value for a configuration key.
#[derive(Debug, thiserror::Error)]
#[error("Invalid configuration for {key}: {message}")]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}
