//! Vector index traits and core types.
//!
//! This module defines the core abstraction for vector storage backends.

use crate::error::DbResult;
use serde::{Deserialize, Serialize};

use super::filter::VectorSearchFilter;

// ============================================================================
// VectorMetric
// ============================================================================

/// Distance metric for vector similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    /// Cosine similarity (default).
    #[default]
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean (L2) distance, reported as `1 / (1 + distance)`.
    L2,
}

impl VectorMetric {
    /// Get the metric name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorMetric::Cosine => "cosine",
            VectorMetric::Dot => "dot",
            VectorMetric::L2 => "l2",
        }
    }
}

impl std::fmt::Display for VectorMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VectorInsert
// ============================================================================

/// A passage vector to insert or update in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorInsert {
    /// Passage (chunk) identifier, unique within its knowledge base.
    pub passage_id: String,

    /// Owning knowledge base.
    pub knowledge_base_id: String,

    /// Owning document.
    #[serde(default)]
    pub knowledge_id: String,

    /// Position of the chunk within its document.
    #[serde(default)]
    pub chunk_index: Option<u32>,

    /// Passage text.
    #[serde(default)]
    pub content: String,

    /// The embedding vector.
    pub vector: Vec<f32>,

    /// Extra JSON metadata.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl VectorInsert {
    /// Create a new vector insert with required fields.
    pub fn new(
        knowledge_base_id: impl Into<String>,
        passage_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            passage_id: passage_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            knowledge_id: String::new(),
            chunk_index: None,
            content: String::new(),
            vector,
            payload: serde_json::Value::Null,
        }
    }

    /// Set the owning document.
    pub fn with_knowledge_id(mut self, knowledge_id: impl Into<String>) -> Self {
        self.knowledge_id = knowledge_id.into();
        self
    }

    /// Set the chunk position.
    pub fn with_chunk_index(mut self, chunk_index: u32) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    /// Set the passage text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ============================================================================
// VectorSearchResult
// ============================================================================

/// A single result from a vector similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchResult {
    pub passage_id: String,
    pub knowledge_base_id: String,
    pub knowledge_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    pub content: String,

    /// Similarity score, higher is better for every metric.
    pub score: f32,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl VectorSearchResult {
    /// Build a result from an insert record and a score.
    pub fn from_insert(insert: &VectorInsert, score: f32) -> Self {
        Self {
            passage_id: insert.passage_id.clone(),
            knowledge_base_id: insert.knowledge_base_id.clone(),
            knowledge_id: insert.knowledge_id.clone(),
            chunk_index: insert.chunk_index,
            content: insert.content.clone(),
            score,
            payload: insert.payload.clone(),
        }
    }
}

// ============================================================================
// VectorIndexBackend Trait
// ============================================================================

/// Core trait for vector index backends.
///
/// ## Implementation Notes
///
/// - Backends are shared at process scope and must be `Send + Sync`.
/// - `query` only ever reads the collection of the given knowledge base.
/// - `query` returns results sorted by score descending, ties broken by
///   passage ID ascending, so identical state yields identical output.
/// - Upsert semantics: a vector with the same (knowledge base, passage ID)
///   replaces the stored one.
pub trait VectorIndexBackend: Send + Sync {
    /// Query one knowledge base's collection for similar vectors.
    fn query(
        &self,
        knowledge_base_id: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>>;

    /// Insert or update vectors.
    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()>;

    /// Delete passages from one knowledge base.
    fn delete(&self, knowledge_base_id: &str, passage_ids: &[String]) -> DbResult<()>;

    /// Look up the chunk at `chunk_index` of a document.
    ///
    /// Backends without positional lookup return `Ok(None)`.
    fn chunk_at(
        &self,
        _knowledge_base_id: &str,
        _knowledge_id: &str,
        _chunk_index: u32,
    ) -> DbResult<Option<VectorSearchResult>> {
        Ok(None)
    }

    /// Knowledge bases that currently have a collection.
    fn knowledge_bases(&self) -> DbResult<Vec<String>>;

    /// Flush pending writes to persistent storage.
    fn flush(&self) -> DbResult<()>;

    /// Total number of vectors across all collections.
    fn len(&self) -> DbResult<usize>;

    /// Check if the index is empty.
    fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Get the dimension of vectors in this index.
    fn dimension(&self) -> usize;

    /// Get the distance metric used by this index.
    fn metric(&self) -> VectorMetric;
}
