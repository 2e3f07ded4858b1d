//! Cross-encoder reranker backends.
//!
//! Reranking is a second pass over the union of candidates from every
//! knowledge base. The rerank stage treats it as optional: a failed call
//! falls back to the pre-rerank order instead of failing the request.
//!
//! The production backend wraps a `kbr-model` rerank service client (see
//! [`crate::model_adapter::ModelRerankerBackend`]).

use std::sync::Arc;

use tracing::info;

use crate::config::RerankerConfig;
use crate::errors::KbrResult;
use crate::model_adapter::ModelRerankerBackend;

// ============================================================================
// RerankerBackend Trait
// ============================================================================

/// Trait for reranker backends.
///
/// Implementations score query-passage pairs. Higher is more relevant.
pub trait RerankerBackend: Send + Sync {
    /// Get the model ID this backend uses.
    fn model_id(&self) -> &str;

    /// Documented maximum passages per call, if the service has one.
    ///
    /// The rerank stage never sends a larger batch.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Score a batch of passages against a query, one score per passage in
    /// input order.
    fn score_batch(&self, query: &str, passages: &[String]) -> KbrResult<Vec<f32>>;
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create the reranker backend described by `config`.
pub fn create_reranker_backend(config: &RerankerConfig) -> KbrResult<Arc<dyn RerankerBackend>> {
    let backend = ModelRerankerBackend::from_config(config)?;
    info!(
        "Reranker backend initialized: {} (max batch {:?})",
        backend.model_id(),
        backend.max_batch_size()
    );
    Ok(Arc::new(backend))
}
