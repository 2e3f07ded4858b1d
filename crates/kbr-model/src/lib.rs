//! # kbr-model
//!
//! Model-service layer for KBR - embeddings and reranking.
//!
//! The retrieval kernel treats both models as opaque scoring oracles. This
//! crate provides:
//!
//! - **Embedding models**: `embed(texts) -> vectors`
//! - **Reranker models**: `score_batch(query, documents) -> scores`, with the
//!   service's documented maximum batch size enforced client-side
//! - **Config**: the canonical service configuration types
//!
//! ## Design Principles
//!
//! 1. **Production-only**: no mock implementations. Test doubles live in consuming crates.
//! 2. **Shared clients**: one connection pool per service, created once and reused.
//! 3. **Provider-agnostic**: traits don't leak HTTP details.
//!
//! ## Features
//!
//! - `remote` (default): HTTP clients built on `reqwest`
//!
//! ## Usage
//!
//! ```ignore
//! use kbr_model::{create_reranker_model, RerankerConfig};
//!
//! let reranker = create_reranker_model(&RerankerConfig::default())?;
//! let scores = reranker.score_batch("query", &passages)?;
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod reranker;

#[cfg(feature = "remote")]
mod http;

pub use config::{EmbeddingConfig, EmbeddingProviderKind, RerankerConfig};
pub use error::{ModelError, ModelResult};
pub use reranker::check_batch_size;

#[cfg(feature = "remote")]
pub use embedding::HttpEmbeddingModel;
#[cfg(feature = "remote")]
pub use reranker::HttpRerankerModel;

// Default model IDs
pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL_ID: &str = "cross-encoder/ms-marco-MiniLM-L6-v2";

// ============================================================================
// Embedding Model Trait
// ============================================================================

/// Trait for embedding models (bi-encoders).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance serves every request.
pub trait EmbeddingModel: Send + Sync + std::fmt::Debug {
    /// Generate embeddings for a batch of texts, one vector per input.
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> ModelResult<Vec<f32>> {
        self.embed(&[text])?.pop().ok_or_else(|| {
            ModelError::embedding_failed(self.model_id(), "service returned no embedding")
        })
    }

    /// Warm up the model by running a dummy inference.
    fn warm_up(&self) -> ModelResult<()> {
        let _ = self.embed(&["warmup"])?;
        Ok(())
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model ID.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Reranker Model Trait
// ============================================================================

/// Trait for reranker models (cross-encoders).
///
/// Higher scores indicate more relevant documents.
pub trait RerankerModel: Send + Sync + std::fmt::Debug {
    /// Score a batch of documents against a query.
    ///
    /// Returns relevance scores in the same order as `documents`.
    fn score_batch(&self, query: &str, documents: &[String]) -> ModelResult<Vec<f32>>;

    /// Rerank documents and return `(original_index, score)` sorted by score descending.
    fn rerank(&self, query: &str, documents: &[String]) -> ModelResult<Vec<(usize, f32)>> {
        let scores = self.score_batch(query, documents)?;
        let mut indexed: Vec<_> = scores.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(indexed)
    }

    /// Warm up the model.
    fn warm_up(&self) -> ModelResult<()> {
        let _ = self.score_batch("warmup", &["warmup doc".to_string()])?;
        Ok(())
    }

    /// Get the model ID.
    fn model_id(&self) -> &str;

    /// Documented maximum documents per call, if the service has one.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create an embedding model from configuration.
///
/// # Errors
///
/// Returns `ModelError` if the configuration is invalid or no provider is
/// compiled in.
#[cfg(feature = "remote")]
pub fn create_embedding_model(config: &EmbeddingConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    Ok(Box::new(HttpEmbeddingModel::new(config)?))
}

#[cfg(not(feature = "remote"))]
pub fn create_embedding_model(config: &EmbeddingConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    Err(ModelError::ProviderNotAvailable {
        provider: config.provider.to_string(),
        reason: "No embedding providers available. Enable the 'remote' feature.".to_string(),
    })
}

/// Create a reranker model from configuration.
///
/// # Errors
///
/// Returns `ModelError` if the configuration is invalid or no provider is
/// compiled in.
#[cfg(feature = "remote")]
pub fn create_reranker_model(config: &RerankerConfig) -> ModelResult<Box<dyn RerankerModel>> {
    Ok(Box::new(HttpRerankerModel::new(config)?))
}

#[cfg(not(feature = "remote"))]
pub fn create_reranker_model(_config: &RerankerConfig) -> ModelResult<Box<dyn RerankerModel>> {
    Err(ModelError::ProviderNotAvailable {
        provider: "http".to_string(),
        reason: "No reranker providers available. Enable the 'remote' feature.".to_string(),
    })
}
