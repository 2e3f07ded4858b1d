//! Merge stage: neighbor expansion, deduplication, adjacency merging.
//!
//! Passage identity is `(knowledge_base_id, passage_id)`. The same passage
//! found by several modalities collapses into one entry that keeps the best
//! effective score and the union of its match types.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::KbrResult;
use crate::gate::BackendGate;
use crate::types::{
    score_desc, MatchType, MergedPassage, PassageId, RerankedCandidate, RetrievalCandidate,
};

use super::context::PipelineContext;
use super::diagnostics::MergeReport;
use super::filter::rank_cmp;

/// Backend label for neighbor lookups.
const NEIGHBOR_BACKEND: &str = "neighbor-source";

/// A chunk fetched by position within its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborChunk {
    pub passage_id: String,
    pub knowledge_id: String,
    pub chunk_index: u32,
    pub content: String,
}

/// Positional chunk lookup used by neighbor expansion.
pub trait NeighborSource: Send + Sync {
    /// The chunk at `chunk_index` of a document, if stored.
    fn chunk_at(
        &self,
        knowledge_base_id: &str,
        knowledge_id: &str,
        chunk_index: u32,
    ) -> KbrResult<Option<NeighborChunk>>;

    /// Chunks within `window` positions of `chunk_index`, excluding it.
    fn neighbors(
        &self,
        knowledge_base_id: &str,
        knowledge_id: &str,
        chunk_index: u32,
        window: u32,
    ) -> KbrResult<Vec<NeighborChunk>> {
        let first = chunk_index.saturating_sub(window);
        let last = chunk_index.saturating_add(window);
        let mut found = Vec::new();
        for index in (first..=last).filter(|i| *i != chunk_index) {
            if let Some(chunk) = self.chunk_at(knowledge_base_id, knowledge_id, index)? {
                found.push(chunk);
            }
        }
        Ok(found)
    }
}

/// Turn `ctx.reranked` into `ctx.merged`.
///
/// Neighbor expansion is skipped once the request is aborted; the
/// deduplication and adjacency passes are local and always run.
pub async fn run(
    ctx: &mut PipelineContext,
    neighbors: Option<&Arc<dyn NeighborSource>>,
    gate: &BackendGate,
) {
    let config = ctx.config.retrieval.merge.clone();
    let mut entries = std::mem::take(&mut ctx.reranked);
    let mut report = MergeReport::default();

    if config.neighbor_expansion && config.neighbor_window > 0 && !ctx.is_aborted() {
        if let Some(source) = neighbors {
            let (added, failures) = expand(
                ctx,
                &entries,
                source,
                gate,
                config.neighbor_window,
                config.neighbor_score_factor,
            )
            .await;
            report.neighbors_added = added.len();
            report.neighbor_failures = failures;
            entries.extend(added);
        }
    }

    let (primary, extras, collapsed) = deduplicate(entries, config.keep_neighbor_duplicates);
    report.duplicates_collapsed = collapsed;

    let mut merged = if config.merge_adjacent {
        let (merged, folded) = merge_adjacent(primary, &config.adjacent_separator);
        report.adjacent_merged = folded;
        merged
    } else {
        primary
    };
    merged.extend(extras);
    merged.sort_by(rank_cmp);

    debug!(
        "Merge stage: {} entries ({} neighbors, {} duplicates, {} adjacent folded)",
        merged.len(),
        report.neighbors_added,
        report.duplicates_collapsed,
        report.adjacent_merged
    );

    ctx.diagnostics.counters.merged = merged.len();
    ctx.diagnostics.merge = report;
    ctx.merged = merged;
}

/// Fetch neighbors for every distinct directly matched chunk, one gate call
/// per parent, in parent order. Returns the neighbor entries and the number
/// of failed lookups.
async fn expand(
    ctx: &PipelineContext,
    entries: &[RerankedCandidate],
    source: &Arc<dyn NeighborSource>,
    gate: &BackendGate,
    window: u32,
    factor: f32,
) -> (Vec<RerankedCandidate>, usize) {
    let mut parents: BTreeMap<(String, String, u32), f32> = BTreeMap::new();
    for entry in entries {
        let c = &entry.candidate;
        let Some(chunk_index) = c.chunk_index else {
            continue;
        };
        if !c.match_type.is_direct() {
            continue;
        }
        let key = (c.knowledge_base_id.clone(), c.knowledge_id.clone(), chunk_index);
        let score = entry.effective_score();
        parents
            .entry(key)
            .and_modify(|best| *best = best.max(score))
            .or_insert(score);
    }

    let mut added = Vec::new();
    let mut failures = 0;
    for ((kb, knowledge_id, chunk_index), parent_score) in parents {
        let call_source = Arc::clone(source);
        let call_kb = kb.clone();
        let outcome = gate
            .call(NEIGHBOR_BACKEND, &kb, &ctx.scope, move || {
                call_source.neighbors(&call_kb, &knowledge_id, chunk_index, window)
            })
            .await;

        match outcome {
            Ok(chunks) => {
                added.extend(chunks.into_iter().map(|chunk| {
                    let candidate = RetrievalCandidate::new(
                        chunk.passage_id,
                        kb.as_str(),
                        chunk.knowledge_id,
                        chunk.content,
                        parent_score * factor,
                        MatchType::NeighborExpansion,
                    )
                    .with_chunk_index(chunk.chunk_index);
                    RerankedCandidate::passthrough(candidate)
                }));
            }
            Err(err) => {
                warn!("Neighbor lookup failed for '{}', skipping: {}", kb, err);
                failures += 1;
            }
        }
    }
    (added, failures)
}

type PassageKey = (String, PassageId);

/// Collapse entries sharing a passage identity.
///
/// Returns the primary entries, the neighbor entries kept apart under
/// `keep_neighbor_duplicates`, and how many entries were folded away.
pub fn deduplicate(
    entries: Vec<RerankedCandidate>,
    keep_neighbor_duplicates: bool,
) -> (Vec<MergedPassage>, Vec<MergedPassage>, usize) {
    let direct: BTreeSet<PassageKey> = entries
        .iter()
        .filter(|e| e.candidate.match_type.is_direct())
        .map(|e| key_of(&e.candidate))
        .collect();

    let mut primary: BTreeMap<PassageKey, MergedPassage> = BTreeMap::new();
    let mut extras: BTreeMap<PassageKey, MergedPassage> = BTreeMap::new();
    let mut collapsed = 0;

    for entry in entries {
        let key = key_of(&entry.candidate);
        let is_neighbor = !entry.candidate.match_type.is_direct();
        let target = if keep_neighbor_duplicates && is_neighbor && direct.contains(&key) {
            &mut extras
        } else {
            &mut primary
        };

        let incoming = MergedPassage::from_reranked(&entry);
        match target.entry(key) {
            Entry::Occupied(mut existing) => {
                absorb(existing.get_mut(), incoming);
                collapsed += 1;
            }
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
        }
    }

    (
        primary.into_values().collect(),
        extras.into_values().collect(),
        collapsed,
    )
}

fn key_of(candidate: &RetrievalCandidate) -> PassageKey {
    (
        candidate.knowledge_base_id.clone(),
        candidate.passage_id.clone(),
    )
}

/// Which of two entries for one passage wins: higher score, then a direct
/// match over a neighbor, then match type order.
fn preference(a: &MergedPassage, b: &MergedPassage) -> Ordering {
    score_desc(a.score, b.score)
        .then_with(|| b.match_type.is_direct().cmp(&a.match_type.is_direct()))
        .then_with(|| a.match_type.cmp(&b.match_type))
}

fn absorb(existing: &mut MergedPassage, incoming: MergedPassage) {
    let mut match_types = existing.match_types.clone();
    match_types.extend(incoming.match_types.iter().copied());
    match_types.sort();
    match_types.dedup();

    if preference(&incoming, existing) == Ordering::Less {
        *existing = incoming;
    }
    existing.match_types = match_types;
}

/// Combine runs of consecutive chunks of the same document into one entry.
///
/// The merged entry takes the identity and position of its first chunk, the
/// contents joined in chunk order, and the scores and match type of its best
/// chunk. Entries without a chunk index are left alone. Returns the entries
/// and how many were folded into another.
pub fn merge_adjacent(
    passages: Vec<MergedPassage>,
    separator: &str,
) -> (Vec<MergedPassage>, usize) {
    let mut documents: BTreeMap<(String, String), Vec<MergedPassage>> = BTreeMap::new();
    let mut out = Vec::new();
    for passage in passages {
        if passage.chunk_index.is_some() {
            documents
                .entry((passage.knowledge_base_id.clone(), passage.knowledge_id.clone()))
                .or_default()
                .push(passage);
        } else {
            out.push(passage);
        }
    }

    let mut folded = 0;
    for (_, mut chunks) in documents {
        chunks.sort_by_key(|p| p.chunk_index);
        let mut run: Vec<MergedPassage> = Vec::new();
        for chunk in chunks {
            let continues = match (run.last().and_then(|p| p.chunk_index), chunk.chunk_index) {
                (Some(prev), Some(next)) => prev.checked_add(1) == Some(next),
                _ => false,
            };
            if !continues && !run.is_empty() {
                folded += run.len() - 1;
                out.push(combine(std::mem::take(&mut run), separator));
            }
            run.push(chunk);
        }
        if !run.is_empty() {
            folded += run.len() - 1;
            out.push(combine(run, separator));
        }
    }
    (out, folded)
}

/// Fold a non-empty run of consecutive chunks.
fn combine(mut run: Vec<MergedPassage>, separator: &str) -> MergedPassage {
    if run.len() == 1 {
        return run.remove(0);
    }

    let best = run
        .iter()
        .enumerate()
        .min_by(|(i, a), (j, b)| score_desc(a.score, b.score).then_with(|| i.cmp(j)))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let content = run
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(separator);
    let merged_passage_ids = run
        .iter()
        .flat_map(|p| p.merged_passage_ids.iter().cloned())
        .collect();
    let mut match_types: Vec<MatchType> = run
        .iter()
        .flat_map(|p| p.match_types.iter().copied())
        .collect();
    match_types.sort();
    match_types.dedup();

    let (score, raw_score, rerank_score, match_type) = {
        let b = &run[best];
        (b.score, b.raw_score, b.rerank_score, b.match_type)
    };
    let first = run.remove(0);
    MergedPassage {
        content,
        score,
        raw_score,
        rerank_score,
        match_type,
        match_types,
        merged_passage_ids,
        ..first
    }
}
