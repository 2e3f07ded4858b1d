//! Error types for kbr-model.

use thiserror::Error;

/// Result type alias for kbr-model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while talking to a model service.
#[derive(Debug, Error)]
pub enum ModelError {
    // ========================================================================
    // Request errors
    // ========================================================================
    /// The rerank batch exceeds the service's documented maximum.
    ///
    /// Raised client-side; the request is never sent.
    #[error("Rerank batch of {requested} passages exceeds the maximum of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },

    /// Transport-level failure (connect, timeout, non-success status).
    #[error("HTTP error from {endpoint}: {message}")]
    Http {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// The service answered with a body we cannot use.
    #[error("Invalid response from '{model_id}': {message}")]
    InvalidResponse { model_id: String, message: String },

    // ========================================================================
    // Inference errors
    // ========================================================================
    /// Embedding generation failed.
    #[error("Embedding failed for model '{model_id}': {message}")]
    EmbeddingFailed { model_id: String, message: String },

    /// Reranking failed.
    #[error("Reranking failed for model '{model_id}': {message}")]
    RerankingFailed { model_id: String, message: String },

    // ========================================================================
    // Provider errors
    // ========================================================================
    /// Provider not available.
    #[error("Provider '{provider}' not available: {reason}")]
    ProviderNotAvailable { provider: String, reason: String },

    /// Configuration rejected before any request was made.
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Create an embedding failed error.
    pub fn embedding_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create a reranking failed error.
    pub fn reranking_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RerankingFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }
}
