//! Shared fakes for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kbr_core::retriever::finalize;
use kbr_core::{
    KbrConfig, KbrError, KbrResult, KnowledgeBaseConfig, Modality, PipelineOutput, Query,
    RerankConfig, RerankerBackend, RetrievalCandidate, RetrievalConfig, RetrievalPipeline,
    RetrievalPipelineBuilder, Retriever,
};

/// Retriever returning canned candidates per knowledge base.
pub struct StaticRetriever {
    modality: Modality,
    hits: BTreeMap<String, Vec<RetrievalCandidate>>,
    failing: BTreeSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticRetriever {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            hits: BTreeMap::new(),
            failing: BTreeSet::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A hit on passage `passage_id` of document `doc-<kb>`.
    pub fn with_hit(self, kb: &str, passage_id: &str, score: f32) -> Self {
        let candidate = RetrievalCandidate::new(
            passage_id,
            kb,
            format!("doc-{}", kb),
            format!("content of {}", passage_id),
            score,
            self.modality.match_type(),
        );
        self.with_candidate(candidate)
    }

    pub fn with_candidate(mut self, candidate: RetrievalCandidate) -> Self {
        self.hits
            .entry(candidate.knowledge_base_id.clone())
            .or_default()
            .push(candidate);
        self
    }

    pub fn failing_for(mut self, kb: &str) -> Self {
        self.failing.insert(kb.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Retriever for StaticRetriever {
    fn modality(&self) -> Modality {
        self.modality
    }

    fn name(&self) -> &str {
        self.modality.as_str()
    }

    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &Query,
        top_k: usize,
    ) -> KbrResult<Vec<RetrievalCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(knowledge_base_id) {
            return Err(KbrError::backend(self.modality.as_str(), "connection refused"));
        }
        let hits: Vec<RetrievalCandidate> = self
            .hits
            .get(knowledge_base_id)
            .map(|hits| {
                hits.iter()
                    .filter(|c| query.allows_knowledge(&c.knowledge_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(finalize(hits, top_k))
    }
}

/// Reranker that rejects over-limit batches the way the real service does
/// and records every batch it accepts.
pub struct RecordingReranker {
    max_batch: usize,
    scores: HashMap<String, f32>,
    default_score: f32,
    fail: bool,
    batches: Mutex<Vec<usize>>,
}

impl RecordingReranker {
    pub fn new(max_batch: usize) -> Self {
        Self {
            max_batch,
            scores: HashMap::new(),
            default_score: 0.5,
            fail: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Score for the passage whose content is `content of <passage_id>`.
    pub fn with_score(mut self, passage_id: &str, score: f32) -> Self {
        self.scores
            .insert(format!("content of {}", passage_id), score);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl RerankerBackend for RecordingReranker {
    fn model_id(&self) -> &str {
        "recording-reranker"
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.max_batch)
    }

    fn score_batch(&self, _query: &str, passages: &[String]) -> KbrResult<Vec<f32>> {
        if passages.len() > self.max_batch {
            return Err(KbrError::RerankBatchTooLarge {
                requested: passages.len(),
                limit: self.max_batch,
            });
        }
        if self.fail {
            return Err(KbrError::RerankFailed {
                model_id: self.model_id().to_string(),
                reason: "HTTP 503".to_string(),
            });
        }
        self.batches.lock().unwrap().push(passages.len());
        Ok(passages
            .iter()
            .map(|p| self.scores.get(p).copied().unwrap_or(self.default_score))
            .collect())
    }
}

/// Configuration registering `kbs` with every modality and rerank disabled.
pub fn config(kbs: &[&str]) -> KbrConfig {
    let mut config = KbrConfig::default();
    config.retrieval = RetrievalConfig::default()
        .with_thresholds(0.0, 0.0)
        .with_rerank(RerankConfig::disabled());
    for kb in kbs {
        config
            .knowledge_bases
            .insert(kb.to_string(), KnowledgeBaseConfig::default());
    }
    config
}

/// Builder over `config`; tests add retrievers and backends.
pub fn builder(config: KbrConfig) -> RetrievalPipelineBuilder {
    RetrievalPipeline::builder().with_config(config)
}

/// Results as `knowledge_base/passage` in output order.
pub fn ids(output: &PipelineOutput) -> Vec<String> {
    output
        .results
        .iter()
        .map(|r| format!("{}/{}", r.knowledge_base_id, r.passage_id))
        .collect()
}
