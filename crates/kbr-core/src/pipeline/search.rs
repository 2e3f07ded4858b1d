//! Search stage: fan out to every distinct known knowledge base.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::engine::CompositeRetrievalEngine;
use crate::errors::{KbrError, KbrResult};
use crate::registry::{KnowledgeBaseRegistry, SearchTarget};

use super::context::PipelineContext;
use super::diagnostics::{TargetReport, TargetStatus};

/// Run the composite engine once per distinct known target and union the
/// results into `ctx.candidates`.
///
/// Repeated IDs are searched once. IDs the registry does not know yield
/// nothing and are listed in the diagnostics. Failed targets are reported
/// and skipped.
///
/// # Errors
///
/// [`KbrError::AllTargetsFailed`] when every known target failed while the
/// request was still live.
pub async fn run(
    ctx: &mut PipelineContext,
    engine: &CompositeRetrievalEngine,
    registry: &dyn KnowledgeBaseRegistry,
) -> KbrResult<()> {
    let distinct = ctx.query.distinct_knowledge_bases();
    ctx.diagnostics.duplicate_targets = ctx.query.knowledge_base_ids().len() - distinct.len();

    let mut targets = Vec::with_capacity(distinct.len());
    for id in distinct {
        match registry.lookup(&id) {
            Some(descriptor) => {
                targets.push(SearchTarget::resolve(&id, &ctx.config.retrieval, &descriptor))
            }
            None => {
                debug!("Unknown knowledge base '{}' yields no candidates", id);
                ctx.diagnostics.unknown_targets.push(id);
            }
        }
    }

    let query = &ctx.query;
    let scope = &ctx.scope;
    let outcomes = join_all(
        targets
            .iter()
            .map(|target| async move { (target, engine.retrieve(target, query, scope).await) }),
    )
    .await;

    let mut candidates = Vec::new();
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for (target, outcome) in outcomes {
        let report = match outcome {
            Ok(retrieval) => {
                let status = if retrieval.failed_modalities().next().is_some() {
                    TargetStatus::Degraded
                } else {
                    TargetStatus::Ok
                };
                let report = TargetReport {
                    knowledge_base_id: retrieval.knowledge_base_id,
                    status,
                    candidates: retrieval.candidates.len(),
                    modalities: retrieval.reports,
                    error: None,
                };
                candidates.extend(retrieval.candidates);
                report
            }
            Err(err) if err.is_interruption() => TargetReport {
                knowledge_base_id: target.knowledge_base_id.clone(),
                status: TargetStatus::Interrupted,
                candidates: 0,
                modalities: Vec::new(),
                error: Some(err.to_string()),
            },
            Err(err) => {
                warn!(
                    "Knowledge base '{}' failed and is excluded: {}",
                    target.knowledge_base_id, err
                );
                failures.push(err.to_string());
                TargetReport {
                    knowledge_base_id: target.knowledge_base_id.clone(),
                    status: TargetStatus::Failed,
                    candidates: 0,
                    modalities: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        reports.push(report);
    }

    ctx.diagnostics.targets = reports;
    ctx.diagnostics.counters.searched = candidates.len();
    ctx.candidates = candidates;

    if !targets.is_empty() && failures.len() == targets.len() && !ctx.scope.is_interrupted() {
        return Err(KbrError::AllTargetsFailed { failures });
    }

    debug!(
        "Search stage: {} candidates from {} target(s), {} unknown, {} failed",
        ctx.candidates.len(),
        targets.len(),
        ctx.diagnostics.unknown_targets.len(),
        failures.len()
    );
    Ok(())
}
