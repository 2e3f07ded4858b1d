//! Vector modality.

use std::sync::Arc;

use kbr_db::vector::{VectorIndexBackend, VectorSearchFilter};
use moka::sync::Cache;
use tracing::trace;

use super::{check_request, finalize, Retriever};
use crate::db_adapter::VECTOR_BACKEND;
use crate::embedding::EmbeddingBackend;
use crate::errors::{IntoKbrResult, KbrResult};
use crate::types::{MatchType, Modality, Query, RetrievalCandidate};

pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 256;

// ============================================================================
// Query embedding cache
// ============================================================================

/// Bounded cache of query embeddings keyed by model and text.
///
/// A query against several knowledge bases embeds its text once. Nothing is
/// locked while the embedding service is called; two concurrent misses for
/// the same text may both embed and the later insert wins.
pub struct QueryEmbeddingCache {
    /// `None` when caching is disabled.
    cache: Option<Cache<(String, String), Arc<Vec<f32>>>>,
}

impl QueryEmbeddingCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        let cache = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .build()
        });
        Self { cache }
    }

    pub fn len(&self) -> usize {
        match &self.cache {
            Some(cache) => {
                cache.run_pending_tasks();
                cache.entry_count() as usize
            }
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached embedding of `text`, computing it on a miss.
    pub fn get_or_embed(
        &self,
        embedder: &dyn EmbeddingBackend,
        text: &str,
    ) -> KbrResult<Arc<Vec<f32>>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(embedder.embed(text)?));
        };

        let key = (embedder.model_id().to_string(), text.to_string());
        if let Some(hit) = cache.get(&key) {
            trace!("Query embedding cache hit");
            return Ok(hit);
        }

        let embedding = Arc::new(embedder.embed(text)?);
        cache.insert(key, Arc::clone(&embedding));
        Ok(embedding)
    }
}

impl std::fmt::Debug for QueryEmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEmbeddingCache")
            .field(
                "max_capacity",
                &self.cache.as_ref().and_then(|c| c.policy().max_capacity()),
            )
            .finish()
    }
}

impl Default for QueryEmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_CACHE_CAPACITY)
    }
}

// ============================================================================
// VectorRetriever
// ============================================================================

/// Vector retriever: embeds the query, then searches the knowledge base's
/// collection in the vector index.
#[derive(Clone)]
pub struct VectorRetriever {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndexBackend>,
    cache: Arc<QueryEmbeddingCache>,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, index: Arc<dyn VectorIndexBackend>) -> Self {
        Self {
            embedder,
            index,
            cache: Arc::new(QueryEmbeddingCache::default()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryEmbeddingCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &QueryEmbeddingCache {
        &self.cache
    }
}

impl std::fmt::Debug for VectorRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorRetriever")
            .field("model_id", &self.embedder.model_id())
            .field("dimension", &self.index.dimension())
            .field("metric", &self.index.metric())
            .finish()
    }
}

impl Retriever for VectorRetriever {
    fn modality(&self) -> Modality {
        Modality::Vector
    }

    fn name(&self) -> &str {
        VECTOR_BACKEND
    }

    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &Query,
        top_k: usize,
    ) -> KbrResult<Vec<RetrievalCandidate>> {
        check_request(knowledge_base_id, top_k)?;

        let embedding = self.cache.get_or_embed(self.embedder.as_ref(), query.text())?;

        let filter = (!query.knowledge_ids().is_empty())
            .then(|| VectorSearchFilter::new().with_knowledge_ids(query.knowledge_ids().to_vec()));

        let results = self
            .index
            .query(knowledge_base_id, &embedding, top_k, filter.as_ref())
            .into_kbr()?;

        let candidates = results
            .into_iter()
            .filter(|r| r.knowledge_base_id == knowledge_base_id)
            .map(|r| {
                let candidate = RetrievalCandidate::new(
                    r.passage_id,
                    knowledge_base_id,
                    r.knowledge_id,
                    r.content,
                    r.score,
                    MatchType::Vector,
                );
                match r.chunk_index {
                    Some(index) => candidate.with_chunk_index(index),
                    None => candidate,
                }
            })
            .collect();

        Ok(finalize(candidates, top_k))
    }
}
