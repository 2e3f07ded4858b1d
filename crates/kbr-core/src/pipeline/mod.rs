//! Retrieval pipeline orchestration.
//!
//! A run moves through a fixed sequence of stages:
//!
//! ```text
//! Search -> Rerank -> Merge -> FilterTopK -> Done
//!    \         \        \          \
//!     +---------+--------+----------+--> Aborted
//! ```
//!
//! - [`search`]: fan out to every distinct knowledge base
//! - [`rerank`]: batch-bounded second-pass scoring with fallback
//! - [`merge`]: neighbor expansion, deduplication, adjacency merging
//! - [`filter`]: final order and top-K cut
//!
//! `Aborted` is entered when the request scope is cancelled or its deadline
//! passes. Whatever was collected by then still goes through the local
//! merge and top-K stages and is returned tagged as partial.

pub mod context;
pub mod diagnostics;
pub mod filter;
pub mod merge;
pub mod rerank;
pub mod search;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::{KbrConfig, SharedConfig};
use crate::engine::CompositeRetrievalEngine;
use crate::errors::{KbrError, KbrResult};
use crate::gate::BackendGate;
use crate::registry::{KnowledgeBaseRegistry, StaticRegistry};
use crate::reranker::RerankerBackend;
use crate::retriever::Retriever;
use crate::scope::RequestScope;
use crate::types::{Query, QueryRequest, SearchResultItem};

pub use context::{PipelineContext, PipelineState, StageCounters};
pub use diagnostics::{
    MergeReport, PipelineDiagnostics, RerankReport, StageTimings, TargetReport, TargetStatus,
};
pub use merge::{NeighborChunk, NeighborSource};

/// Final ranked list plus how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub results: Vec<SearchResultItem>,
    /// `Done`, or `Aborted` when the request scope ended early.
    pub state: PipelineState,
    /// Results reflect only part of the work.
    pub partial: bool,
    pub diagnostics: PipelineDiagnostics,
}

/// Multi-knowledge-base retrieval pipeline.
///
/// Backends are shared by every run; each run owns its own
/// [`PipelineContext`] and configuration snapshot.
pub struct RetrievalPipeline {
    config: Arc<SharedConfig>,
    engine: CompositeRetrievalEngine,
    /// `None` resolves knowledge bases from each run's configuration.
    registry: Option<Arc<dyn KnowledgeBaseRegistry>>,
    reranker: Option<Arc<dyn RerankerBackend>>,
    neighbors: Option<Arc<dyn NeighborSource>>,
}

impl std::fmt::Debug for RetrievalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalPipeline")
            .field("engine", &self.engine)
            .field("custom_registry", &self.registry.is_some())
            .field(
                "reranker",
                &self.reranker.as_ref().map(|r| r.model_id().to_string()),
            )
            .field("neighbor_expansion", &self.neighbors.is_some())
            .finish()
    }
}

impl RetrievalPipeline {
    pub fn builder() -> RetrievalPipelineBuilder {
        RetrievalPipelineBuilder::default()
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn engine(&self) -> &CompositeRetrievalEngine {
        &self.engine
    }

    /// Validate and swap in a new configuration for subsequent runs.
    ///
    /// Runs already in flight keep the snapshot they started with. Unless a
    /// custom registry was supplied, the new `knowledgeBases` section and
    /// its overrides apply from the next run. The backend concurrency cap
    /// is fixed when the pipeline is built.
    pub fn reload_config(&self, config: KbrConfig) -> KbrResult<()> {
        for warning in self.config.replace(config)? {
            tracing::warn!("Config warning: {}", warning);
        }
        Ok(())
    }

    /// Run one query end to end.
    ///
    /// The caller's scope is narrowed by the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`KbrError::InvalidArgument`] for a malformed request, before any
    ///   stage runs
    /// - [`KbrError::AllTargetsFailed`] when every known knowledge base
    ///   failed
    pub async fn run(&self, request: QueryRequest, scope: RequestScope) -> KbrResult<PipelineOutput> {
        let query = Arc::new(request.validate()?);
        let config = self.config.snapshot()?;
        let request_id = uuid::Uuid::new_v4().to_string();

        let span = tracing::info_span!("retrieval", request_id = %request_id);
        self.execute(query, config, scope, request_id)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        query: Arc<Query>,
        config: Arc<KbrConfig>,
        scope: RequestScope,
        request_id: String,
    ) -> KbrResult<PipelineOutput> {
        let started = Instant::now();
        let scope = scope.narrowed(config.retrieval.request_timeout());
        let gate = self
            .engine
            .gate()
            .with_timeout(config.retrieval.backend_timeout());
        let engine = self.engine.with_gate(gate.clone());
        let registry: Arc<dyn KnowledgeBaseRegistry> = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => Arc::new(StaticRegistry::from_config(&config)),
        };
        let mut ctx = PipelineContext::new(query, config, scope, request_id);

        if let Some(reason) = ctx.scope.interruption() {
            ctx.abort(reason);
        } else {
            let stage = Instant::now();
            let outcome = search::run(&mut ctx, &engine, &*registry).await;
            ctx.diagnostics.timings.search_ms = elapsed_ms(stage);
            outcome?;
        }

        ctx.advance(PipelineState::Rerank);
        let stage = Instant::now();
        rerank::run(&mut ctx, self.reranker.as_ref(), &gate).await;
        ctx.diagnostics.timings.rerank_ms = elapsed_ms(stage);

        ctx.advance(PipelineState::Merge);
        let stage = Instant::now();
        merge::run(&mut ctx, self.neighbors.as_ref(), &gate).await;
        ctx.diagnostics.timings.merge_ms = elapsed_ms(stage);

        ctx.advance(PipelineState::FilterTopK);
        let stage = Instant::now();
        filter::run(&mut ctx);
        ctx.diagnostics.timings.filter_ms = elapsed_ms(stage);

        ctx.finish();
        ctx.diagnostics.timings.total_ms = elapsed_ms(started);

        let partial = ctx.is_aborted();
        tracing::info!(
            "Retrieval completed in {}ms: {} results from {} knowledge bases ({} failed, {} unknown){}",
            ctx.diagnostics.timings.total_ms,
            ctx.merged.len(),
            ctx.diagnostics.targets.len(),
            ctx.diagnostics.failed_targets().count(),
            ctx.diagnostics.unknown_targets.len(),
            if partial { ", partial" } else { "" }
        );

        let state = ctx.state;
        let results = std::mem::take(&mut ctx.merged)
            .into_iter()
            .map(SearchResultItem::from)
            .collect();
        Ok(PipelineOutput {
            results,
            state,
            partial,
            diagnostics: ctx.diagnostics,
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`RetrievalPipeline`].
///
/// ```ignore
/// let pipeline = RetrievalPipeline::builder()
///     .with_config(config)
///     .with_retriever(Arc::new(VectorRetriever::new(embedder, index)))
///     .with_retriever(Arc::new(KeywordRetriever::new(store)))
///     .with_reranker(reranker)
///     .build()?;
/// ```
#[derive(Default)]
pub struct RetrievalPipelineBuilder {
    config: Option<KbrConfig>,
    shared_config: Option<Arc<SharedConfig>>,
    retrievers: Vec<Arc<dyn Retriever>>,
    registry: Option<Arc<dyn KnowledgeBaseRegistry>>,
    reranker: Option<Arc<dyn RerankerBackend>>,
    neighbors: Option<Arc<dyn NeighborSource>>,
    gate: Option<BackendGate>,
}

impl RetrievalPipelineBuilder {
    /// Configuration validated at [`build`](Self::build).
    pub fn with_config(mut self, config: KbrConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share a configuration holder with other components. Takes
    /// precedence over [`with_config`](Self::with_config).
    pub fn with_shared_config(mut self, config: Arc<SharedConfig>) -> Self {
        self.shared_config = Some(config);
        self
    }

    /// Register a modality adapter. A later retriever for the same
    /// modality replaces the earlier one.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    /// Defaults to a [`StaticRegistry`] built from the `knowledgeBases`
    /// section of each run's configuration snapshot, so reloads apply.
    pub fn with_registry(mut self, registry: Arc<dyn KnowledgeBaseRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankerBackend>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_neighbor_source(mut self, neighbors: Arc<dyn NeighborSource>) -> Self {
        self.neighbors = Some(neighbors);
        self
    }

    /// Share a backend gate (and its in-flight cap) with other pipelines.
    pub fn with_gate(mut self, gate: BackendGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> KbrResult<RetrievalPipeline> {
        if self.retrievers.is_empty() {
            return Err(KbrError::invalid_config(
                "no retrievers registered",
                "Add a vector or keyword retriever with with_retriever()",
            ));
        }

        let config = match self.shared_config {
            Some(shared) => shared,
            None => Arc::new(SharedConfig::new(self.config.unwrap_or_default())?),
        };
        let snapshot = config.snapshot()?;

        let gate = self.gate.unwrap_or_else(|| {
            BackendGate::new(
                snapshot.retrieval.max_concurrent_backend_calls,
                snapshot.retrieval.backend_timeout(),
            )
        });

        let engine = self
            .retrievers
            .into_iter()
            .fold(CompositeRetrievalEngine::new(gate), |engine, retriever| {
                engine.with_retriever(retriever)
            });

        tracing::debug!(
            "Built retrieval pipeline: modalities {:?}, reranker {}, neighbor source {}",
            engine.modalities().collect::<Vec<_>>(),
            self.reranker.is_some(),
            self.neighbors.is_some()
        );

        Ok(RetrievalPipeline {
            config,
            engine,
            registry: self.registry,
            reranker: self.reranker,
            neighbors: self.neighbors,
        })
    }
}
