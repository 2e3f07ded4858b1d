//! Adapter layer for kbr-db infrastructure.
//!
//! This module bridges kbr-db storage with kbr-core's domain types. It
//! provides:
//!
//! - Error conversion from `DbError` to `KbrError`
//! - [`VectorIndexNeighbors`], which serves neighbor expansion from a vector
//!   index's positional lookup
//!
//! The vector retriever talks to `kbr_db::vector::VectorIndexBackend`
//! directly; only errors cross this module.

use std::sync::Arc;

use kbr_db::vector::VectorIndexBackend;

use crate::errors::{IntoKbrResult, KbrError, KbrResult};
use crate::pipeline::{NeighborChunk, NeighborSource};

/// Backend name used in errors raised by the vector store.
pub const VECTOR_BACKEND: &str = "vector-index";

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a kbr-db error to a kbr-core error.
pub fn from_db_error(err: kbr_db::DbError) -> KbrError {
    use kbr_db::DbError;

    match err {
        DbError::Io(io_err) => KbrError::Io(io_err),

        DbError::Json(json_err) => KbrError::Json(json_err),

        DbError::Config { message } => KbrError::InvalidConfiguration {
            message,
            hint: "Check the vector index configuration".to_string(),
        },

        DbError::MissingKnowledgeBase { passage_id } => KbrError::InvalidArgument(format!(
            "vector '{}' has no knowledge base",
            passage_id
        )),

        DbError::DimensionMismatch { expected, actual } => KbrError::BackendUnavailable {
            backend: VECTOR_BACKEND.to_string(),
            reason: format!(
                "query embedding has {} dimensions, index expects {}",
                actual, expected
            ),
        },

        other @ (DbError::VectorIo { .. }
        | DbError::VectorParse { .. }
        | DbError::IndexNotFound { .. }
        | DbError::IndexIncompatible { .. }
        | DbError::Internal { .. }) => KbrError::BackendUnavailable {
            backend: VECTOR_BACKEND.to_string(),
            reason: other.to_string(),
        },
    }
}

impl<T> IntoKbrResult<T> for Result<T, kbr_db::DbError> {
    fn into_kbr(self) -> KbrResult<T> {
        self.map_err(from_db_error)
    }
}

// ============================================================================
// Neighbor lookup
// ============================================================================

/// Neighbor source backed by a vector index's `chunk_at` lookup.
#[derive(Clone)]
pub struct VectorIndexNeighbors {
    index: Arc<dyn VectorIndexBackend>,
}

impl VectorIndexNeighbors {
    pub fn new(index: Arc<dyn VectorIndexBackend>) -> Self {
        Self { index }
    }
}

impl std::fmt::Debug for VectorIndexNeighbors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexNeighbors")
            .field("dimension", &self.index.dimension())
            .field("metric", &self.index.metric())
            .finish()
    }
}

impl NeighborSource for VectorIndexNeighbors {
    fn chunk_at(
        &self,
        knowledge_base_id: &str,
        knowledge_id: &str,
        chunk_index: u32,
    ) -> KbrResult<Option<NeighborChunk>> {
        let found = self
            .index
            .chunk_at(knowledge_base_id, knowledge_id, chunk_index)
            .into_kbr()?;
        Ok(found.map(|r| NeighborChunk {
            passage_id: r.passage_id,
            knowledge_id: r.knowledge_id,
            chunk_index,
            content: r.content,
        }))
    }
}
