//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for every embedding operation.
///
/// Remote failures carry the provider name so that a fallback chain can report
/// which attempt failed and why. Configuration problems (missing or placeholder
/// credentials, invalid numbers) are kept apart from runtime failures so callers
/// can tell "not set up" from "set up but failing".
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Invalid or incomplete configuration
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Transport-level failure talking to a remote provider
    #[error("{provider} request failed: {source}")]
    Request {
        provider: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote provider answered with a non-success status
    #[error("{provider} returned {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// Remote provider answered with something we could not use
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    /// A vector did not have the dimension the provider or collection expects
    #[error("{provider} produced {actual}-dimensional vectors, expected {expected}")]
    DimensionMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    /// Every provider in the chain failed for a single call
    #[error("All embedding providers failed: {}", attempts.join("; "))]
    ProvidersExhausted { attempts: Vec<String> },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap a transport error raised while calling `provider`.
    pub fn request<E>(provider: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Request {
            provider: provider.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid response error for `provider`.
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error comes from configuration rather than a failed call.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }
}
