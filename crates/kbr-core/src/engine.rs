//! Composite retrieval engine: every modality for one knowledge base.
//!
//! Modalities run concurrently, each through the [`BackendGate`]. Each
//! modality's threshold is applied on its own scale; scores are never
//! normalized across modalities here.
//!
//! ## Failure policy
//!
//! A failing modality is recorded in its [`ModalityReport`] and the other
//! modalities' candidates are still returned. Only when every configured
//! modality fails does the engine return an error for the knowledge base.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{KbrError, KbrResult};
use crate::gate::BackendGate;
use crate::registry::SearchTarget;
use crate::retriever::Retriever;
use crate::scope::RequestScope;
use crate::types::{Modality, Query, RetrievalCandidate};

/// Outcome of one modality for one knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalityReport {
    pub modality: Modality,
    pub backend: String,
    /// Candidates returned by the adapter.
    pub returned: usize,
    /// Candidates at or above the threshold.
    pub kept: usize,
    pub threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ModalityReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Surviving candidates of one knowledge base plus per-modality reports.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRetrieval {
    pub knowledge_base_id: String,
    pub candidates: Vec<RetrievalCandidate>,
    pub reports: Vec<ModalityReport>,
}

impl TargetRetrieval {
    pub fn failed_modalities(&self) -> impl Iterator<Item = &ModalityReport> {
        self.reports.iter().filter(|r| !r.succeeded())
    }
}

#[derive(Clone)]
pub struct CompositeRetrievalEngine {
    retrievers: BTreeMap<Modality, Arc<dyn Retriever>>,
    gate: BackendGate,
}

impl std::fmt::Debug for CompositeRetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeRetrievalEngine")
            .field("modalities", &self.retrievers.keys().collect::<Vec<_>>())
            .field("gate", &self.gate)
            .finish()
    }
}

impl CompositeRetrievalEngine {
    pub fn new(gate: BackendGate) -> Self {
        Self {
            retrievers: BTreeMap::new(),
            gate,
        }
    }

    /// Register the adapter for its modality, replacing any previous one.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.insert(retriever.modality(), retriever);
        self
    }

    pub fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        self.retrievers.keys().copied()
    }

    pub fn gate(&self) -> &BackendGate {
        &self.gate
    }

    /// Same retrievers behind a different gate.
    pub fn with_gate(&self, gate: BackendGate) -> Self {
        Self {
            retrievers: self.retrievers.clone(),
            gate,
        }
    }

    /// Run every modality of `target` and union the survivors.
    ///
    /// # Errors
    ///
    /// - [`KbrError::TargetFailed`] when every modality failed
    /// - [`KbrError::Cancelled`] / [`KbrError::DeadlineExceeded`] when every
    ///   modality was cut short by the request scope
    pub async fn retrieve(
        &self,
        target: &SearchTarget,
        query: &Arc<Query>,
        scope: &RequestScope,
    ) -> KbrResult<TargetRetrieval> {
        let runs = target
            .modalities
            .iter()
            .map(|&modality| self.run_modality(modality, target, query, scope));
        let outcomes = join_all(runs).await;

        let mut candidates = Vec::new();
        let mut reports = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut interruption = None;

        for (report, result) in outcomes {
            match result {
                Ok(kept) => candidates.extend(kept),
                Err(err) => {
                    if err.is_interruption() {
                        interruption.get_or_insert(err);
                    } else {
                        warn!(
                            "Modality {} failed for knowledge base '{}': {}",
                            report.modality, target.knowledge_base_id, err
                        );
                        failures.push(format!("{}: {}", report.modality, err));
                    }
                }
            }
            reports.push(report);
        }

        if !target.modalities.is_empty() && reports.iter().all(|r| !r.succeeded()) {
            if failures.is_empty() {
                if let Some(err) = interruption {
                    return Err(err);
                }
            }
            return Err(KbrError::TargetFailed {
                knowledge_base: target.knowledge_base_id.clone(),
                failures: reports
                    .iter()
                    .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.modality, e)))
                    .collect(),
            });
        }

        debug!(
            "Knowledge base '{}': {} candidates from {} modalities",
            target.knowledge_base_id,
            candidates.len(),
            reports.len()
        );

        Ok(TargetRetrieval {
            knowledge_base_id: target.knowledge_base_id.clone(),
            candidates,
            reports,
        })
    }

    async fn run_modality(
        &self,
        modality: Modality,
        target: &SearchTarget,
        query: &Arc<Query>,
        scope: &RequestScope,
    ) -> (ModalityReport, KbrResult<Vec<RetrievalCandidate>>) {
        let threshold = target.threshold_for(modality);
        let started = Instant::now();
        let mut report = ModalityReport {
            modality,
            backend: modality.to_string(),
            returned: 0,
            kept: 0,
            threshold,
            error: None,
            elapsed_ms: 0,
        };

        let result = match self.retrievers.get(&modality) {
            None => Err(KbrError::backend(
                modality.as_str(),
                "no retriever configured for this modality",
            )),
            Some(retriever) => {
                report.backend = retriever.name().to_string();
                let retriever = Arc::clone(retriever);
                let query = Arc::clone(query);
                let kb = target.knowledge_base_id.clone();
                let top_k = target.top_k;
                self.gate
                    .call(
                        &report.backend,
                        &target.knowledge_base_id,
                        scope,
                        move || retriever.retrieve(&kb, &query, top_k),
                    )
                    .await
            }
        };

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        let result = result.map(|candidates| {
            report.returned = candidates.len();
            let kept: Vec<RetrievalCandidate> = candidates
                .into_iter()
                .filter(|c| c.score >= threshold)
                .collect();
            report.kept = kept.len();
            kept
        });
        if let Err(err) = &result {
            report.error = Some(err.to_string());
        }
        (report, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchType, QueryRequest};
    use std::time::Duration;

    struct Fixed {
        modality: Modality,
        scores: Vec<f32>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Fixed {
        fn new(modality: Modality, scores: &[f32]) -> Self {
            Self {
                modality,
                scores: scores.to_vec(),
                fail: false,
                delay: None,
            }
        }

        fn failing(modality: Modality) -> Self {
            Self {
                fail: true,
                ..Self::new(modality, &[])
            }
        }
    }

    impl Retriever for Fixed {
        fn modality(&self) -> Modality {
            self.modality
        }

        fn name(&self) -> &str {
            self.modality.as_str()
        }

        fn retrieve(
            &self,
            knowledge_base_id: &str,
            _query: &Query,
            top_k: usize,
        ) -> KbrResult<Vec<RetrievalCandidate>> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail {
                return Err(KbrError::backend(self.modality.as_str(), "connection refused"));
            }
            Ok(self
                .scores
                .iter()
                .enumerate()
                .take(top_k)
                .map(|(i, &s)| {
                    RetrievalCandidate::new(
                        format!("{}-{}", self.modality, i),
                        knowledge_base_id,
                        "doc",
                        "text",
                        s,
                        self.modality.match_type(),
                    )
                })
                .collect())
        }
    }

    fn target(vector: f32, keyword: f32) -> SearchTarget {
        SearchTarget {
            knowledge_base_id: "kb".to_string(),
            modalities: Modality::ALL.to_vec(),
            vector_threshold: vector,
            keyword_threshold: keyword,
            top_k: 10,
        }
    }

    fn query() -> Arc<Query> {
        Arc::new(QueryRequest::new("q", ["kb"]).validate().unwrap())
    }

    fn gate() -> BackendGate {
        BackendGate::new(4, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive_per_modality() {
        let engine = CompositeRetrievalEngine::new(gate())
            .with_retriever(Arc::new(Fixed::new(Modality::Vector, &[0.5, 0.49])))
            .with_retriever(Arc::new(Fixed::new(Modality::Keyword, &[0.3, 0.2])));

        let out = engine
            .retrieve(&target(0.5, 0.3), &query(), &RequestScope::new())
            .await
            .unwrap();
        let mut scores: Vec<f32> = out.candidates.iter().map(|c| c.score).collect();
        scores.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(scores, vec![0.3, 0.5]);
        assert_eq!(out.reports[0].returned, 2);
        assert_eq!(out.reports[0].kept, 1);
    }

    #[tokio::test]
    async fn test_one_failing_modality_keeps_the_other() {
        let engine = CompositeRetrievalEngine::new(gate())
            .with_retriever(Arc::new(Fixed::new(Modality::Vector, &[0.9])))
            .with_retriever(Arc::new(Fixed::failing(Modality::Keyword)));

        let out = engine
            .retrieve(&target(0.5, 0.0), &query(), &RequestScope::new())
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].match_type, MatchType::Vector);
        let failed: Vec<_> = out.failed_modalities().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].modality, Modality::Keyword);
    }

    #[tokio::test]
    async fn test_all_modalities_failing_is_target_failure() {
        let engine = CompositeRetrievalEngine::new(gate())
            .with_retriever(Arc::new(Fixed::failing(Modality::Vector)))
            .with_retriever(Arc::new(Fixed::failing(Modality::Keyword)));

        let err = engine
            .retrieve(&target(0.5, 0.0), &query(), &RequestScope::new())
            .await
            .unwrap_err();
        match err {
            KbrError::TargetFailed {
                knowledge_base,
                failures,
            } => {
                assert_eq!(knowledge_base, "kb");
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_modality_times_out_without_losing_the_other() {
        let slow = Fixed {
            delay: Some(Duration::from_millis(300)),
            ..Fixed::new(Modality::Keyword, &[0.7])
        };
        let engine = CompositeRetrievalEngine::new(BackendGate::new(4, Duration::from_millis(50)))
            .with_retriever(Arc::new(Fixed::new(Modality::Vector, &[0.9])))
            .with_retriever(Arc::new(slow));

        let out = engine
            .retrieve(&target(0.5, 0.0), &query(), &RequestScope::new())
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
        let failed: Vec<_> = out.failed_modalities().collect();
        assert!(failed[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_retriever_counts_as_failure() {
        let engine = CompositeRetrievalEngine::new(gate())
            .with_retriever(Arc::new(Fixed::new(Modality::Vector, &[0.9])));

        let out = engine
            .retrieve(&target(0.5, 0.0), &query(), &RequestScope::new())
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.failed_modalities().count(), 1);
    }
}
