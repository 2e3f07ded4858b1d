//! End-to-end behavior of the retrieval pipeline over fake backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{builder, config, ids, RecordingReranker, StaticRetriever};
use kbr_core::{
    KbrError, KnowledgeBaseConfig, MatchType, Modality, PipelineState, QueryRequest,
    RequestScope, RerankConfig, RerankOverflow, TargetStatus,
};

fn vector() -> StaticRetriever {
    StaticRetriever::new(Modality::Vector)
}

fn keyword() -> StaticRetriever {
    StaticRetriever::new(Modality::Keyword)
}

fn request(kbs: &[&str]) -> QueryRequest {
    QueryRequest::new("vacation policy", kbs.iter().copied())
}

// ============================================================================
// Search stage
// ============================================================================

#[tokio::test]
async fn test_duplicate_targets_are_searched_once() {
    let v = Arc::new(vector().with_hit("kb-1", "a", 0.9).with_hit("kb-2", "b", 0.8));
    let pipeline = builder(config(&["kb-1", "kb-2"]))
        .with_retriever(v.clone())
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();

    let out = pipeline
        .run(request(&["kb-1", "kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(v.calls(), 2);
    assert_eq!(out.diagnostics.duplicate_targets, 1);
    assert_eq!(out.diagnostics.targets.len(), 2);
    assert_eq!(ids(&out), vec!["kb-1/a", "kb-2/b"]);
}

#[tokio::test]
async fn test_target_order_does_not_change_output() {
    let pipeline = builder(config(&["kb-1", "kb-2"]))
        .with_retriever(Arc::new(
            vector()
                .with_hit("kb-1", "p", 0.7)
                .with_hit("kb-2", "p", 0.7)
                .with_hit("kb-2", "q", 0.9),
        ))
        .with_retriever(Arc::new(keyword().with_hit("kb-1", "r", 0.7)))
        .build()
        .unwrap();

    let forward = pipeline
        .run(request(&["kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap();
    let backward = pipeline
        .run(request(&["kb-2", "kb-1"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&forward.results).unwrap(),
        serde_json::to_string(&backward.results).unwrap()
    );
    assert_eq!(ids(&forward), vec!["kb-2/q", "kb-1/p", "kb-2/p", "kb-1/r"]);
}

#[tokio::test]
async fn test_unknown_target_yields_nothing_and_is_not_fatal() {
    let pipeline = builder(config(&["kb-1"]))
        .with_retriever(Arc::new(vector().with_hit("kb-1", "a", 0.9)))
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();

    let out = pipeline
        .run(request(&["kb-1", "ghost"]), RequestScope::new())
        .await
        .unwrap();
    assert_eq!(ids(&out), vec!["kb-1/a"]);
    assert_eq!(out.diagnostics.unknown_targets, vec!["ghost"]);
    assert_eq!(out.state, PipelineState::Done);
    assert!(!out.partial);

    let only_unknown = pipeline
        .run(request(&["ghost"]), RequestScope::new())
        .await
        .unwrap();
    assert!(only_unknown.results.is_empty());
    assert!(only_unknown.diagnostics.targets.is_empty());
}

#[tokio::test]
async fn test_failed_modality_keeps_the_other_modality() {
    let pipeline = builder(config(&["kb-1", "kb-2"]))
        .with_retriever(Arc::new(
            vector().with_hit("kb-1", "a", 0.9).failing_for("kb-2"),
        ))
        .with_retriever(Arc::new(keyword().with_hit("kb-2", "k", 1.5)))
        .build()
        .unwrap();

    let out = pipeline
        .run(request(&["kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["kb-2/k", "kb-1/a"]);
    let kb2 = out.diagnostics.target("kb-2").unwrap();
    assert_eq!(kb2.status, TargetStatus::Degraded);
    assert!(kb2
        .modalities
        .iter()
        .any(|m| m.modality == Modality::Vector && m.error.is_some()));
    assert_eq!(out.diagnostics.target("kb-1").unwrap().status, TargetStatus::Ok);
}

#[tokio::test]
async fn test_failed_target_does_not_poison_the_others() {
    let pipeline = builder(config(&["kb-1", "kb-2"]))
        .with_retriever(Arc::new(
            vector().with_hit("kb-1", "a", 0.9).failing_for("kb-2"),
        ))
        .with_retriever(Arc::new(keyword().failing_for("kb-2")))
        .build()
        .unwrap();

    let out = pipeline
        .run(request(&["kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["kb-1/a"]);
    assert_eq!(out.diagnostics.failed_targets().count(), 1);
    assert_eq!(
        out.diagnostics.target("kb-2").unwrap().status,
        TargetStatus::Failed
    );
    assert_eq!(out.state, PipelineState::Done);
}

#[tokio::test]
async fn test_every_target_failing_is_an_error() {
    let pipeline = builder(config(&["kb-1", "kb-2"]))
        .with_retriever(Arc::new(
            vector().failing_for("kb-1").failing_for("kb-2"),
        ))
        .with_retriever(Arc::new(
            keyword().failing_for("kb-1").failing_for("kb-2"),
        ))
        .build()
        .unwrap();

    let err = pipeline
        .run(request(&["kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap_err();
    match err {
        KbrError::AllTargetsFailed { failures } => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_request_is_rejected_before_search() {
    let v = Arc::new(vector());
    let pipeline = builder(config(&["kb-1"]))
        .with_retriever(v.clone())
        .build()
        .unwrap();

    let err = pipeline
        .run(QueryRequest::new("  ", ["kb-1"]), RequestScope::new())
        .await
        .unwrap_err();
    assert!(matches!(err, KbrError::InvalidArgument(_)));
    assert_eq!(v.calls(), 0);
}

// ============================================================================
// Thresholds and ranking
// ============================================================================

#[tokio::test]
async fn test_threshold_boundary_is_kept() {
    let mut cfg = config(&["kb"]);
    cfg.retrieval.vector_threshold = 0.5;
    let pipeline = builder(cfg)
        .with_retriever(Arc::new(
            vector().with_hit("kb", "at", 0.5).with_hit("kb", "below", 0.49),
        ))
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(ids(&out), vec!["kb/at"]);
}

#[tokio::test]
async fn test_results_never_exceed_final_top_k() {
    let mut cfg = config(&["kb"]);
    cfg.retrieval.final_top_k = 5;
    let hits = (0..20).fold(vector(), |r, i| {
        r.with_hit("kb", &format!("p{:02}", i), 0.2 + i as f32 * 0.01)
    });
    let pipeline = builder(cfg)
        .with_retriever(Arc::new(hits))
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(out.results.len(), 5);
    assert_eq!(out.results[0].passage_id.as_str(), "p19");
    assert!(out
        .results
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
    assert_eq!(out.diagnostics.counters.searched, 20);
    assert_eq!(out.diagnostics.counters.returned, 5);
}

#[tokio::test]
async fn test_same_passage_from_both_modalities_is_one_result() {
    let pipeline = builder(config(&["kb"]))
        .with_retriever(Arc::new(vector().with_hit("kb", "p", 0.8)))
        .with_retriever(Arc::new(keyword().with_hit("kb", "p", 2.0)))
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(out.results.len(), 1);
    let item = &out.results[0];
    assert_eq!(item.score, 2.0);
    assert_eq!(item.match_type, MatchType::Keyword);
    assert_eq!(item.match_types, vec![MatchType::Vector, MatchType::Keyword]);
    assert_eq!(out.diagnostics.merge.duplicates_collapsed, 1);
}

#[tokio::test]
async fn test_two_knowledge_bases_with_per_base_thresholds() {
    let mut cfg = config(&["kb-1"]);
    cfg.retrieval.final_top_k = 5;
    cfg.knowledge_bases.insert(
        "kb-2".to_string(),
        KnowledgeBaseConfig::default()
            .with_vector_threshold(0.5)
            .with_keyword_threshold(0.3),
    );
    let pipeline = builder(cfg)
        .with_retriever(Arc::new(
            vector().with_hit("kb-1", "v1", 0.9).with_hit("kb-2", "v2", 0.4),
        ))
        .with_retriever(Arc::new(keyword().with_hit("kb-2", "k2", 0.6)))
        .build()
        .unwrap();

    let out = pipeline
        .run(request(&["kb-1", "kb-2"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["kb-1/v1", "kb-2/k2"]);
    assert_eq!(out.results[0].match_type, MatchType::Vector);
    assert_eq!(out.results[1].match_type, MatchType::Keyword);
    assert_eq!(out.results[1].score, 0.6);
    assert!(!out.diagnostics.rerank.used);

    let json = serde_json::to_value(&out.results[1]).unwrap();
    assert_eq!(json["passageID"], "k2");
    assert_eq!(json["knowledgeID"], "doc-kb-2");
    assert_eq!(json["knowledgeBaseID"], "kb-2");
    assert_eq!(json["matchType"], "keyword");
}

// ============================================================================
// Rerank stage
// ============================================================================

fn rerank_config(kbs: &[&str], rerank: RerankConfig) -> kbr_core::KbrConfig {
    let mut cfg = config(kbs);
    cfg.retrieval.rerank = rerank;
    cfg
}

fn descending_hits(count: usize) -> StaticRetriever {
    (0..count).fold(vector(), |r, i| {
        r.with_hit("kb", &format!("p{:02}", i), 0.9 - i as f32 * 0.01)
    })
}

#[tokio::test]
async fn test_one_over_the_rerank_limit_still_returns_results() {
    let reranker = Arc::new(RecordingReranker::new(4));
    let pipeline = builder(rerank_config(&["kb"], RerankConfig::default()))
        .with_retriever(Arc::new(descending_hits(5)))
        .with_retriever(Arc::new(keyword()))
        .with_reranker(reranker.clone())
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();

    assert_eq!(reranker.batches(), vec![4]);
    assert_eq!(out.results.len(), 4);
    assert!(out.results.iter().all(|r| r.passage_id.as_str() != "p04"));
    let report = &out.diagnostics.rerank;
    assert!(report.used);
    assert_eq!(report.batch_limit, 4);
    assert_eq!(report.dropped_by_truncation, 1);
    assert!(report.fallback_reason.is_none());
}

#[tokio::test]
async fn test_twice_the_rerank_limit_truncates_or_partitions() {
    let reranker = Arc::new(RecordingReranker::new(4));
    let pipeline = builder(rerank_config(&["kb"], RerankConfig::default()))
        .with_retriever(Arc::new(descending_hits(8)))
        .with_retriever(Arc::new(keyword()))
        .with_reranker(reranker.clone())
        .build()
        .unwrap();
    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(reranker.batches(), vec![4]);
    assert_eq!(out.results.len(), 4);
    assert_eq!(out.diagnostics.rerank.dropped_by_truncation, 4);

    let reranker = Arc::new(RecordingReranker::new(4));
    let partition = RerankConfig::default().with_overflow(RerankOverflow::Partition, 2);
    let pipeline = builder(rerank_config(&["kb"], partition))
        .with_retriever(Arc::new(descending_hits(8)))
        .with_retriever(Arc::new(keyword()))
        .with_reranker(reranker.clone())
        .build()
        .unwrap();
    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(reranker.batches(), vec![4, 4]);
    assert_eq!(out.results.len(), 8);
    assert_eq!(out.diagnostics.rerank.dropped_by_truncation, 0);
    assert_eq!(out.diagnostics.rerank.batches, 2);
}

#[tokio::test]
async fn test_rerank_failure_falls_back_to_retrieval_order() {
    let reranker = Arc::new(RecordingReranker::new(8).failing());
    let pipeline = builder(rerank_config(&["kb"], RerankConfig::default()))
        .with_retriever(Arc::new(descending_hits(3)))
        .with_retriever(Arc::new(keyword()))
        .with_reranker(reranker)
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(ids(&out), vec!["kb/p00", "kb/p01", "kb/p02"]);
    assert!(!out.diagnostics.rerank.used);
    assert!(out
        .diagnostics
        .rerank
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("503"));
}

#[tokio::test]
async fn test_rerank_scores_reorder_and_threshold() {
    let reranker = Arc::new(
        RecordingReranker::new(8)
            .with_score("p00", 0.1)
            .with_score("p01", 0.3)
            .with_score("p02", 0.95),
    );
    let pipeline = builder(rerank_config(
        &["kb"],
        RerankConfig::default().with_threshold(0.3),
    ))
    .with_retriever(Arc::new(descending_hits(3)))
    .with_retriever(Arc::new(keyword()))
    .with_reranker(reranker)
    .build()
    .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(ids(&out), vec!["kb/p02", "kb/p01"]);
    assert_eq!(out.results[0].score, 0.95);
    assert_eq!(out.diagnostics.rerank.dropped_by_threshold, 1);
    assert!(!out.diagnostics.rerank.degraded);
}

#[tokio::test]
async fn test_rerank_threshold_degrades_once() {
    let reranker = Arc::new(
        RecordingReranker::new(8)
            .with_score("p00", 0.2)
            .with_score("p01", 0.05),
    );
    let strict = RerankConfig::default()
        .with_threshold(0.9)
        .with_degraded_threshold(0.1)
        .with_min_results(1);
    let pipeline = builder(rerank_config(&["kb"], strict))
        .with_retriever(Arc::new(descending_hits(2)))
        .with_retriever(Arc::new(keyword()))
        .with_reranker(reranker.clone())
        .build()
        .unwrap();

    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(ids(&out), vec!["kb/p00"]);
    assert!(out.diagnostics.rerank.degraded);
    assert_eq!(reranker.batches(), vec![2]);
}

// ============================================================================
// Cancellation and deadlines
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start_returns_empty_partial() {
    let v = Arc::new(vector().with_hit("kb", "a", 0.9));
    let pipeline = builder(config(&["kb"]))
        .with_retriever(v.clone())
        .build()
        .unwrap();

    let scope = RequestScope::new();
    scope.token().cancel();
    let out = pipeline.run(request(&["kb"]), scope).await.unwrap();

    assert!(out.partial);
    assert_eq!(out.state, PipelineState::Aborted);
    assert!(out.results.is_empty());
    assert_eq!(
        out.diagnostics.aborted_reason.as_deref(),
        Some("Request cancelled")
    );
    assert_eq!(v.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_returns_what_finished() {
    let pipeline = builder(config(&["kb-1"]))
        .with_retriever(Arc::new(vector().with_hit("kb-1", "a", 0.9)))
        .with_retriever(Arc::new(
            keyword()
                .with_hit("kb-1", "slow", 3.0)
                .with_delay(Duration::from_millis(500)),
        ))
        .with_reranker(Arc::new(RecordingReranker::new(8)))
        .build()
        .unwrap();

    let out = pipeline
        .run(
            request(&["kb-1"]),
            RequestScope::with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(out.partial);
    assert_eq!(out.state, PipelineState::Aborted);
    assert_eq!(ids(&out), vec!["kb-1/a"]);
    assert!(!out.diagnostics.rerank.used);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_reload_applies_to_the_next_run() {
    let pipeline = builder(config(&["kb"]))
        .with_retriever(Arc::new(descending_hits(3)))
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();
    assert_eq!(
        pipeline
            .run(request(&["kb"]), RequestScope::new())
            .await
            .unwrap()
            .results
            .len(),
        3
    );

    let mut next = config(&["kb"]);
    next.retrieval.final_top_k = 1;
    pipeline.reload_config(next).unwrap();
    let out = pipeline.run(request(&["kb"]), RequestScope::new()).await.unwrap();
    assert_eq!(ids(&out), vec!["kb/p00"]);

    let mut invalid = config(&["kb"]);
    invalid.retrieval.final_top_k = 0;
    assert!(pipeline.reload_config(invalid).is_err());
}

#[tokio::test]
async fn test_reload_updates_knowledge_bases_and_overrides() {
    let pipeline = builder(config(&["kb"]))
        .with_retriever(Arc::new(
            vector().with_hit("kb", "a", 0.6).with_hit("kb-new", "b", 0.6),
        ))
        .with_retriever(Arc::new(keyword()))
        .build()
        .unwrap();

    let before = pipeline
        .run(request(&["kb", "kb-new"]), RequestScope::new())
        .await
        .unwrap();
    assert_eq!(ids(&before), vec!["kb/a"]);
    assert_eq!(before.diagnostics.unknown_targets, vec!["kb-new"]);

    let mut next = config(&["kb-new"]);
    next.knowledge_bases.insert(
        "kb".to_string(),
        KnowledgeBaseConfig::default().with_vector_threshold(0.9),
    );
    pipeline.reload_config(next).unwrap();

    let after = pipeline
        .run(request(&["kb", "kb-new"]), RequestScope::new())
        .await
        .unwrap();
    assert_eq!(ids(&after), vec!["kb-new/b"]);
    assert!(after.diagnostics.unknown_targets.is_empty());
    assert_eq!(after.diagnostics.target("kb").unwrap().candidates, 0);
}
