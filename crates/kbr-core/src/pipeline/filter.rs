//! Final ordering and the top-K cut.

use std::cmp::Ordering;

use crate::types::{score_desc, MergedPassage};

use super::context::PipelineContext;

/// Score descending, ties by passage ID, knowledge base, match type.
pub(crate) fn rank_cmp(a: &MergedPassage, b: &MergedPassage) -> Ordering {
    score_desc(a.score, b.score)
        .then_with(|| a.passage_id.cmp(&b.passage_id))
        .then_with(|| a.knowledge_base_id.cmp(&b.knowledge_base_id))
        .then_with(|| a.match_type.cmp(&b.match_type))
}

/// The best `k` passages in final order.
pub fn top_k(mut passages: Vec<MergedPassage>, k: usize) -> Vec<MergedPassage> {
    passages.sort_by(rank_cmp);
    passages.truncate(k);
    passages
}

pub fn run(ctx: &mut PipelineContext) {
    let k = ctx.config.retrieval.final_top_k;
    let merged = std::mem::take(&mut ctx.merged);
    ctx.merged = top_k(merged, k);
    ctx.diagnostics.counters.returned = ctx.merged.len();
}
