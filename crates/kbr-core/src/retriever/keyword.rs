//! Keyword modality.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{check_request, finalize, Retriever};
use crate::errors::KbrResult;
use crate::types::{MatchType, Modality, Query, RetrievalCandidate};

/// One keyword match as reported by a keyword backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordHit {
    pub passage_id: String,
    pub knowledge_id: String,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    pub content: String,
    pub score: f32,
}

/// A keyword index partitioned by knowledge base.
///
/// `search` reads only the given knowledge base's partition. An unknown
/// knowledge base has no matches.
pub trait KeywordIndexBackend: Send + Sync {
    fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
        knowledge_ids: &[String],
    ) -> KbrResult<Vec<KeywordHit>>;
}

/// Keyword retriever over a [`KeywordIndexBackend`].
#[derive(Clone)]
pub struct KeywordRetriever {
    backend: Arc<dyn KeywordIndexBackend>,
    name: String,
}

impl KeywordRetriever {
    pub fn new(backend: Arc<dyn KeywordIndexBackend>) -> Self {
        Self {
            backend,
            name: "bm25".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Debug for KeywordRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordRetriever")
            .field("name", &self.name)
            .finish()
    }
}

impl Retriever for KeywordRetriever {
    fn modality(&self) -> Modality {
        Modality::Keyword
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &Query,
        top_k: usize,
    ) -> KbrResult<Vec<RetrievalCandidate>> {
        check_request(knowledge_base_id, top_k)?;

        let hits = self
            .backend
            .search(knowledge_base_id, query.text(), top_k, query.knowledge_ids())?;

        let candidates = hits
            .into_iter()
            .filter(|hit| query.allows_knowledge(&hit.knowledge_id))
            .map(|hit| {
                let candidate = RetrievalCandidate::new(
                    hit.passage_id,
                    knowledge_base_id,
                    hit.knowledge_id,
                    hit.content,
                    hit.score,
                    MatchType::Keyword,
                );
                match hit.chunk_index {
                    Some(index) => candidate.with_chunk_index(index),
                    None => candidate,
                }
            })
            .collect();

        Ok(finalize(candidates, top_k))
    }
}
