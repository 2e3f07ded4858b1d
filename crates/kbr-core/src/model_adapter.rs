//! Adapter layer for kbr-model infrastructure.
//!
//! This module bridges kbr-model service clients with kbr-core's domain
//! types. It provides:
//!
//! - Error conversion from `ModelError` to `KbrError`
//! - Wrapper types that implement kbr-core traits using kbr-model clients
//!
//! ## Architecture
//!
//! ```text
//! kbr-core domain code (vector retriever, rerank stage)
//!        ↓
//!   model_adapter (this module) - wrappers + conversions
//!        ↓
//!     kbr-model implementations (HTTP embedding / rerank services)
//! ```

use crate::config::{EmbeddingConfig, RerankerConfig};
use crate::embedding::EmbeddingBackend;
use crate::errors::{IntoKbrResult, KbrError, KbrResult};
use crate::reranker::RerankerBackend;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a kbr-model error to a kbr-core error.
pub fn from_model_error(err: kbr_model::ModelError) -> KbrError {
    use kbr_model::ModelError;

    match err {
        ModelError::BatchTooLarge { requested, limit } => {
            KbrError::RerankBatchTooLarge { requested, limit }
        }

        ModelError::Http {
            endpoint,
            status,
            message,
        } => KbrError::BackendUnavailable {
            backend: endpoint,
            reason: match status {
                Some(code) => format!("HTTP {}: {}", code, message),
                None => message,
            },
        },

        ModelError::InvalidResponse { model_id, message } => KbrError::BackendUnavailable {
            backend: model_id,
            reason: format!("invalid response: {}", message),
        },

        ModelError::EmbeddingFailed { model_id, message } => KbrError::EmbeddingFailed {
            model_id,
            reason: message,
        },

        ModelError::RerankingFailed { model_id, message } => KbrError::RerankFailed {
            model_id,
            reason: message,
        },

        ModelError::ProviderNotAvailable { provider, reason } => {
            KbrError::BackendUnavailable {
                backend: provider,
                reason,
            }
        }

        ModelError::InvalidConfig { message } => KbrError::InvalidConfiguration {
            message,
            hint: "Check the embedding and reranker sections of the config file".to_string(),
        },

        ModelError::Json(json_err) => KbrError::Json(json_err),
    }
}

impl<T> IntoKbrResult<T> for Result<T, kbr_model::ModelError> {
    fn into_kbr(self) -> KbrResult<T> {
        self.map_err(from_model_error)
    }
}

// ============================================================================
// Embedding Backend Wrapper
// ============================================================================

/// Wrapper around a kbr-model embedding model for kbr-core.
pub struct ModelEmbeddingBackend {
    inner: Box<dyn kbr_model::EmbeddingModel>,
}

impl std::fmt::Debug for ModelEmbeddingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEmbeddingBackend")
            .field("model_id", &self.inner.model_id())
            .field("dimension", &self.inner.dimension())
            .finish()
    }
}

impl ModelEmbeddingBackend {
    pub fn new(model: Box<dyn kbr_model::EmbeddingModel>) -> Self {
        Self { inner: model }
    }

    /// Create the service client described by `config`.
    pub fn from_config(config: &EmbeddingConfig) -> KbrResult<Self> {
        let model = kbr_model::create_embedding_model(config).into_kbr()?;
        Ok(Self::new(model))
    }
}

impl EmbeddingBackend for ModelEmbeddingBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, inputs: &[String]) -> KbrResult<Vec<Vec<f32>>> {
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        self.inner.embed(&refs).into_kbr()
    }
}

// ============================================================================
// Reranker Backend Wrapper
// ============================================================================

/// Wrapper around a kbr-model reranker model for kbr-core.
pub struct ModelRerankerBackend {
    inner: Box<dyn kbr_model::RerankerModel>,
}

impl std::fmt::Debug for ModelRerankerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRerankerBackend")
            .field("model_id", &self.inner.model_id())
            .field("max_batch_size", &self.inner.max_batch_size())
            .finish()
    }
}

impl ModelRerankerBackend {
    pub fn new(model: Box<dyn kbr_model::RerankerModel>) -> Self {
        Self { inner: model }
    }

    /// Create the service client described by `config`.
    pub fn from_config(config: &RerankerConfig) -> KbrResult<Self> {
        let model = kbr_model::create_reranker_model(config).into_kbr()?;
        Ok(Self::new(model))
    }
}

impl RerankerBackend for ModelRerankerBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.inner.max_batch_size()
    }

    fn score_batch(&self, query: &str, passages: &[String]) -> KbrResult<Vec<f32>> {
        self.inner.score_batch(query, passages).into_kbr()
    }
}
