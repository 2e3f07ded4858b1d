//! Search filter for vector queries.

use serde::{Deserialize, Serialize};

/// Filter criteria applied inside one knowledge base's collection.
///
/// The knowledge base itself is not part of the filter: it selects the
/// collection and is always required by [`super::VectorIndexBackend::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchFilter {
    /// Restrict to these documents. Empty means no restriction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_ids: Vec<String>,

    /// Exclude these passages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_passage_ids: Vec<String>,
}

impl VectorSearchFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single document.
    pub fn with_knowledge_id(mut self, knowledge_id: impl Into<String>) -> Self {
        self.knowledge_ids.push(knowledge_id.into());
        self
    }

    /// Restrict to a set of documents.
    pub fn with_knowledge_ids(mut self, knowledge_ids: Vec<String>) -> Self {
        self.knowledge_ids = knowledge_ids;
        self
    }

    /// Exclude passages by ID.
    pub fn with_excluded_passages(mut self, passage_ids: Vec<String>) -> Self {
        self.exclude_passage_ids = passage_ids;
        self
    }

    /// Check if the filter has no criteria.
    pub fn is_empty(&self) -> bool {
        self.knowledge_ids.is_empty() && self.exclude_passage_ids.is_empty()
    }

    /// Check whether a passage passes the filter.
    pub fn matches(&self, knowledge_id: &str, passage_id: &str) -> bool {
        if !self.knowledge_ids.is_empty() && !self.knowledge_ids.iter().any(|k| k == knowledge_id)
        {
            return false;
        }
        !self.exclude_passage_ids.iter().any(|p| p == passage_id)
    }
}
