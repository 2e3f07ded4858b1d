//! Per-request pipeline state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::KbrConfig;
use crate::errors::KbrError;
use crate::scope::RequestScope;
use crate::types::{MergedPassage, Query, RerankedCandidate, RetrievalCandidate};

use super::diagnostics::PipelineDiagnostics;

/// Orchestrator state. Stages run strictly in order; `Aborted` is reachable
/// from any stage once the request scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Search,
    Rerank,
    Merge,
    FilterTopK,
    Done,
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// Candidate counts at each stage boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCounters {
    /// Union of every target's surviving candidates.
    pub searched: usize,
    /// Entries leaving the rerank stage.
    pub reranked: usize,
    /// Entries leaving the merge stage.
    pub merged: usize,
    pub returned: usize,
}

/// Accumulator threaded through the stages of one request. Owned by the
/// orchestrator, never shared between requests.
#[derive(Debug)]
pub struct PipelineContext {
    pub(crate) query: Arc<Query>,
    pub(crate) config: Arc<KbrConfig>,
    pub(crate) scope: RequestScope,
    pub(crate) state: PipelineState,
    pub(crate) candidates: Vec<RetrievalCandidate>,
    pub(crate) reranked: Vec<RerankedCandidate>,
    pub(crate) merged: Vec<MergedPassage>,
    pub(crate) diagnostics: PipelineDiagnostics,
}

impl PipelineContext {
    pub fn new(
        query: Arc<Query>,
        config: Arc<KbrConfig>,
        scope: RequestScope,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            query,
            config,
            scope,
            state: PipelineState::Search,
            candidates: Vec::new(),
            reranked: Vec::new(),
            merged: Vec::new(),
            diagnostics: PipelineDiagnostics::new(request_id),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn config(&self) -> &KbrConfig {
        &self.config
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn diagnostics(&self) -> &PipelineDiagnostics {
        &self.diagnostics
    }

    pub fn is_aborted(&self) -> bool {
        self.state == PipelineState::Aborted
    }

    /// Move to `next` unless the scope has ended, in which case the
    /// context becomes `Aborted` and stays there.
    pub fn advance(&mut self, next: PipelineState) -> PipelineState {
        if self.is_aborted() {
            return self.state;
        }
        if let Some(reason) = self.scope.interruption() {
            self.abort(reason);
            return self.state;
        }
        debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
        self.state
    }

    /// Mark the run complete. A run that already aborted stays aborted.
    pub(crate) fn finish(&mut self) {
        if !self.is_aborted() {
            self.state = PipelineState::Done;
        }
    }

    pub fn abort(&mut self, reason: KbrError) {
        if self.is_aborted() {
            return;
        }
        warn!(
            "Retrieval aborted during {:?}: {}; returning partial results",
            self.state, reason
        );
        self.diagnostics.aborted_reason = Some(reason.to_string());
        self.state = PipelineState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryRequest;

    fn context(scope: RequestScope) -> PipelineContext {
        let query = QueryRequest::new("q", ["kb"]).validate().unwrap();
        PipelineContext::new(
            Arc::new(query),
            Arc::new(KbrConfig::default()),
            scope,
            "req",
        )
    }

    #[test]
    fn test_advance_through_stages() {
        let mut ctx = context(RequestScope::new());
        assert_eq!(ctx.advance(PipelineState::Rerank), PipelineState::Rerank);
        assert_eq!(ctx.advance(PipelineState::Merge), PipelineState::Merge);
        assert!(!ctx.state().is_terminal());
    }

    #[test]
    fn test_cancelled_scope_aborts_and_sticks() {
        let scope = RequestScope::new();
        let mut ctx = context(scope.clone());
        scope.token().cancel();

        assert_eq!(ctx.advance(PipelineState::Rerank), PipelineState::Aborted);
        assert_eq!(ctx.advance(PipelineState::Done), PipelineState::Aborted);
        assert_eq!(
            ctx.diagnostics().aborted_reason.as_deref(),
            Some("Request cancelled")
        );
    }
}
