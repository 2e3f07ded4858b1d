//! Rerank stage: second-pass scoring of the candidate union.
//!
//! The rerank service has a documented maximum batch size. This stage never
//! sends more than that in one call: when there are more candidates than
//! fit, the best by raw score are sent (interleaved by modality when
//! configured) and the rest are dropped and counted. Overflow is an expected
//! condition, not an error.
//!
//! Reranking improves quality but is never required for an answer. If any
//! call fails, every candidate passes through in its pre-rerank order
//! without rerank scores.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{RerankConfig, RerankOverflow};
use crate::errors::{KbrError, KbrResult};
use crate::gate::BackendGate;
use crate::reranker::RerankerBackend;
use crate::types::{score_desc, MatchType, RerankedCandidate, RetrievalCandidate};

use super::context::PipelineContext;
use super::diagnostics::RerankReport;

/// Label used for rerank calls, which span every knowledge base.
const RERANK_SCOPE: &str = "*";

/// Rerank `ctx.candidates` into `ctx.reranked`.
pub async fn run(
    ctx: &mut PipelineContext,
    reranker: Option<&Arc<dyn RerankerBackend>>,
    gate: &BackendGate,
) {
    let config = ctx.config.retrieval.rerank.clone();
    let candidates = std::mem::take(&mut ctx.candidates);
    let mut report = RerankReport {
        threshold: config.threshold,
        ..Default::default()
    };

    let skip = if ctx.is_aborted() {
        Some("request aborted")
    } else if !config.enabled {
        Some("disabled in configuration")
    } else if reranker.is_none() {
        Some("no reranker configured")
    } else if candidates.is_empty() {
        Some("no candidates")
    } else {
        None
    };

    let reranked = match (skip, reranker) {
        (None, Some(backend)) => rerank(ctx, &config, backend, gate, candidates, &mut report).await,
        (reason, _) => {
            report.skipped_reason = reason.map(str::to_string);
            passthrough(candidates)
        }
    };

    ctx.diagnostics.counters.reranked = reranked.len();
    ctx.diagnostics.rerank = report;
    ctx.reranked = reranked;
}

/// Pre-rerank order with no rerank scores.
pub fn passthrough(candidates: Vec<RetrievalCandidate>) -> Vec<RerankedCandidate> {
    sort_by_raw_score(candidates)
        .into_iter()
        .map(RerankedCandidate::passthrough)
        .collect()
}

async fn rerank(
    ctx: &PipelineContext,
    config: &RerankConfig,
    backend: &Arc<dyn RerankerBackend>,
    gate: &BackendGate,
    candidates: Vec<RetrievalCandidate>,
    report: &mut RerankReport,
) -> Vec<RerankedCandidate> {
    let limit = batch_limit(config, backend.max_batch_size());
    report.model_id = Some(backend.model_id().to_string());
    report.batch_limit = limit;

    let ordered = sort_by_raw_score(candidates);
    let selection = if config.preserve_modality_diversity {
        interleave_modalities(ordered.clone())
    } else {
        ordered.clone()
    };
    let (selected, overflow) = select_for_rerank(selection, limit, config);
    report.dropped_by_truncation = overflow;
    if overflow > 0 {
        debug!(
            "Rerank: {} candidates exceed capacity; sending the best {} in batches of {}",
            overflow + selected.len(),
            selected.len(),
            limit
        );
    }

    let scores = match score_all(ctx, backend, gate, &selected, limit, report).await {
        Ok(scores) => scores,
        Err(err) => {
            warn!(
                "Rerank failed, keeping pre-rerank order for {} candidates: {}",
                ordered.len(),
                err
            );
            report.fallback_reason = Some(err.to_string());
            return passthrough(ordered);
        }
    };

    report.used = true;
    let ranked = rank(selected, scores);
    let (kept, degraded) = apply_threshold(&ranked, config);
    report.degraded = degraded;
    report.dropped_by_threshold = ranked.len() - kept.len();
    kept
}

/// Score every batch in order. The first failure fails the whole pass.
async fn score_all(
    ctx: &PipelineContext,
    backend: &Arc<dyn RerankerBackend>,
    gate: &BackendGate,
    selected: &[RetrievalCandidate],
    limit: usize,
    report: &mut RerankReport,
) -> KbrResult<Vec<f32>> {
    let mut scores = Vec::with_capacity(selected.len());
    for batch in selected.chunks(limit) {
        let passages: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let query = ctx.query.text().to_string();
        let backend_for_call = Arc::clone(backend);

        report.batches += 1;
        report.sent += passages.len();
        let batch_scores = gate
            .call(backend.model_id(), RERANK_SCOPE, &ctx.scope, move || {
                backend_for_call.score_batch(&query, &passages)
            })
            .await?;

        if batch_scores.len() != batch.len() {
            return Err(KbrError::RerankFailed {
                model_id: backend.model_id().to_string(),
                reason: format!(
                    "expected {} scores, got {}",
                    batch.len(),
                    batch_scores.len()
                ),
            });
        }
        scores.extend(batch_scores);
    }
    Ok(scores)
}

/// The configured batch size tightened by the backend's own limit.
pub fn batch_limit(config: &RerankConfig, backend_limit: Option<usize>) -> usize {
    let limit = match backend_limit {
        Some(max) => config.max_batch_size.min(max),
        None => config.max_batch_size,
    };
    limit.max(1)
}

/// Split candidates into those sent to the reranker and the number left
/// out. `Truncate` sends one batch; `Partition` up to `max_batches`.
pub fn select_for_rerank(
    mut ordered: Vec<RetrievalCandidate>,
    limit: usize,
    config: &RerankConfig,
) -> (Vec<RetrievalCandidate>, usize) {
    let capacity = match config.overflow {
        RerankOverflow::Truncate => limit,
        RerankOverflow::Partition => limit.saturating_mul(config.max_batches.max(1)),
    };
    let overflow = ordered.len().saturating_sub(capacity);
    ordered.truncate(capacity);
    (ordered, overflow)
}

/// Raw score descending, ties by passage ID, knowledge base, match type.
fn sort_by_raw_score(mut candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    candidates.sort_by(|a, b| score_desc(a.score, b.score).then_with(|| a.provenance_cmp(b)));
    candidates
}

/// Round-robin across match types, keeping each type's internal order, so a
/// truncated batch is not filled by whichever modality scores higher on its
/// own scale.
fn interleave_modalities(ordered: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    let mut queues: BTreeMap<MatchType, VecDeque<RetrievalCandidate>> = BTreeMap::new();
    for candidate in ordered {
        queues.entry(candidate.match_type).or_default().push_back(candidate);
    }

    let mut out = Vec::new();
    loop {
        let mut progressed = false;
        for queue in queues.values_mut() {
            if let Some(candidate) = queue.pop_front() {
                out.push(candidate);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

/// Attach scores and 1-based ranks, best first.
fn rank(selected: Vec<RetrievalCandidate>, scores: Vec<f32>) -> Vec<RerankedCandidate> {
    let mut pairs: Vec<(RetrievalCandidate, f32)> = selected.into_iter().zip(scores).collect();
    pairs.sort_by(|a, b| score_desc(a.1, b.1).then_with(|| a.0.provenance_cmp(&b.0)));
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, (candidate, score))| RerankedCandidate::reranked(candidate, score, i + 1))
        .collect()
}

/// Keep scores at or above the threshold. When fewer than `min_results`
/// survive and a degraded threshold is configured, filter once more with
/// it. Returns the survivors and whether the degraded threshold was used.
pub fn apply_threshold(
    ranked: &[RerankedCandidate],
    config: &RerankConfig,
) -> (Vec<RerankedCandidate>, bool) {
    let filter = |threshold: f32| -> Vec<RerankedCandidate> {
        ranked
            .iter()
            .filter(|c| c.effective_score() >= threshold)
            .cloned()
            .collect()
    };

    let kept = filter(config.threshold);
    if kept.len() >= config.min_results {
        return (kept, false);
    }
    match config.degraded_threshold {
        Some(degraded) if degraded < config.threshold => {
            let relaxed = filter(degraded);
            warn!(
                "Rerank threshold {} kept {} of {}; degraded to {} and kept {}",
                config.threshold,
                kept.len(),
                ranked.len(),
                degraded,
                relaxed.len()
            );
            (relaxed, true)
        }
        _ => (kept, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f32, match_type: MatchType) -> RetrievalCandidate {
        RetrievalCandidate::new(id, "kb", "doc", format!("text {}", id), score, match_type)
    }

    #[test]
    fn test_batch_limit_takes_the_smaller() {
        let config = RerankConfig::default().with_max_batch_size(32);
        assert_eq!(batch_limit(&config, None), 32);
        assert_eq!(batch_limit(&config, Some(8)), 8);
        assert_eq!(batch_limit(&config, Some(64)), 32);
    }

    #[test]
    fn test_truncate_keeps_best_raw_scores() {
        let ordered = sort_by_raw_score(vec![
            candidate("a", 0.1, MatchType::Vector),
            candidate("b", 0.9, MatchType::Vector),
            candidate("c", 0.5, MatchType::Vector),
        ]);
        let config = RerankConfig::default();
        let (selected, overflow) = select_for_rerank(ordered, 2, &config);
        let ids: Vec<&str> = selected.iter().map(|c| c.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(overflow, 1);
    }

    #[test]
    fn test_partition_allows_several_batches() {
        let ordered: Vec<_> = (0..10)
            .map(|i| candidate(&format!("p{:02}", i), 1.0 - i as f32 * 0.01, MatchType::Vector))
            .collect();
        let config = RerankConfig::default().with_overflow(RerankOverflow::Partition, 2);
        let (selected, overflow) = select_for_rerank(ordered, 4, &config);
        assert_eq!(selected.len(), 8);
        assert_eq!(overflow, 2);
    }

    #[test]
    fn test_interleave_alternates_match_types() {
        let ordered = sort_by_raw_score(vec![
            candidate("v1", 0.9, MatchType::Vector),
            candidate("v2", 0.8, MatchType::Vector),
            candidate("v3", 0.7, MatchType::Vector),
            candidate("k1", 5.0, MatchType::Keyword),
        ]);
        let ids: Vec<String> = interleave_modalities(ordered)
            .into_iter()
            .map(|c| c.passage_id.to_string())
            .collect();
        assert_eq!(ids, vec!["v1", "k1", "v2", "v3"]);
    }

    #[test]
    fn test_threshold_inclusive_then_degrade_once() {
        let ranked = rank(
            vec![
                candidate("a", 0.0, MatchType::Vector),
                candidate("b", 0.0, MatchType::Vector),
            ],
            vec![0.5, 0.2],
        );

        let strict = RerankConfig::default().with_threshold(0.5);
        let (kept, degraded) = apply_threshold(&ranked, &strict);
        assert_eq!(kept.len(), 1);
        assert!(!degraded);

        let relaxed = RerankConfig::default()
            .with_threshold(0.9)
            .with_degraded_threshold(0.1);
        let (kept, degraded) = apply_threshold(&ranked, &relaxed);
        assert_eq!(kept.len(), 2);
        assert!(degraded);
        assert_eq!(kept[0].rerank.unwrap().rank, 1);
    }
}
