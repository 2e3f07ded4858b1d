//! Query embedding backends.
//!
//! The vector retriever only needs text in, vector out. The production
//! backend wraps a `kbr-model` embedding service client (see
//! [`crate::model_adapter::ModelEmbeddingBackend`]); tests plug in their own.

use std::sync::Arc;

use tracing::info;

use crate::config::EmbeddingConfig;
use crate::errors::{KbrError, KbrResult};
use crate::model_adapter::ModelEmbeddingBackend;

// ============================================================================
// EmbeddingBackend Trait
// ============================================================================

/// Trait for embedding backends.
///
/// Backends are shared by every request and called from blocking worker
/// threads, hence `Send + Sync`.
pub trait EmbeddingBackend: Send + Sync {
    /// Get the model ID this backend uses.
    fn model_id(&self) -> &str;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of text inputs, one vector per input.
    fn embed_batch(&self, inputs: &[String]) -> KbrResult<Vec<Vec<f32>>>;

    /// Embed a single text input.
    fn embed(&self, input: &str) -> KbrResult<Vec<f32>> {
        self.embed_batch(&[input.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| KbrError::EmbeddingFailed {
                model_id: self.model_id().to_string(),
                reason: "embed_batch returned empty results".to_string(),
            })
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create the embedding backend described by `config`.
pub fn create_embedding_backend(config: &EmbeddingConfig) -> KbrResult<Arc<dyn EmbeddingBackend>> {
    let backend = ModelEmbeddingBackend::from_config(config)?;
    info!(
        "Embedding backend initialized: {} ({} dims)",
        backend.model_id(),
        backend.dimension()
    );
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyBackend;

    impl EmbeddingBackend for EmptyBackend {
        fn model_id(&self) -> &str {
            "empty"
        }

        fn dimension(&self) -> usize {
            3
        }

        fn embed_batch(&self, _inputs: &[String]) -> KbrResult<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_embed_without_result_is_error() {
        assert!(matches!(
            EmptyBackend.embed("hello"),
            Err(KbrError::EmbeddingFailed { .. })
        ));
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = EmbeddingConfig::default().with_endpoint("");
        assert!(create_embedding_backend(&config).is_err());
    }
}
