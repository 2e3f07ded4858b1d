//! Per-request diagnostics returned alongside the results.

use serde::{Deserialize, Serialize};

use crate::engine::ModalityReport;

use super::context::StageCounters;

/// How one knowledge base fared in the search stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetStatus {
    /// Every modality succeeded.
    Ok,
    /// Some modalities failed; the others contributed.
    Degraded,
    /// Every modality failed.
    Failed,
    /// The request was cancelled or timed out before the target finished.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub knowledge_base_id: String,
    pub status: TargetStatus,
    /// Candidates contributed after thresholds.
    pub candidates: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<ModalityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the rerank stage did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankReport {
    /// Rerank scores were applied to the output.
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Effective passages-per-call limit.
    pub batch_limit: usize,
    pub batches: usize,
    /// Passages sent to the service.
    pub sent: usize,
    /// Lowest-ranked candidates left out because they did not fit.
    pub dropped_by_truncation: usize,
    /// Candidates below the rerank threshold.
    pub dropped_by_threshold: usize,
    pub threshold: f32,
    /// The relaxed threshold was applied.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// What the merge stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub neighbors_added: usize,
    pub neighbor_failures: usize,
    /// Entries folded into another entry for the same passage.
    pub duplicates_collapsed: usize,
    /// Entries folded into an adjacent chunk.
    pub adjacent_merged: usize,
}

/// Wall-clock time per stage in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub search_ms: u64,
    pub rerank_ms: u64,
    pub merge_ms: u64,
    pub filter_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDiagnostics {
    pub request_id: String,
    /// One entry per distinct known knowledge base, sorted by ID.
    pub targets: Vec<TargetReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_targets: Vec<String>,
    /// Repeated knowledge base IDs ignored before fan-out.
    pub duplicate_targets: usize,
    pub rerank: RerankReport,
    pub merge: MergeReport,
    pub counters: StageCounters,
    pub timings: StageTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_reason: Option<String>,
}

impl PipelineDiagnostics {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn target(&self, knowledge_base_id: &str) -> Option<&TargetReport> {
        self.targets
            .iter()
            .find(|t| t.knowledge_base_id == knowledge_base_id)
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|t| t.status == TargetStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let mut diagnostics = PipelineDiagnostics::new("req-1");
        diagnostics.unknown_targets.push("ghost".to_string());
        diagnostics.rerank.dropped_by_truncation = 3;
        diagnostics.targets.push(TargetReport {
            knowledge_base_id: "kb".to_string(),
            status: TargetStatus::Degraded,
            candidates: 2,
            modalities: Vec::new(),
            error: None,
        });

        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["unknownTargets"][0], "ghost");
        assert_eq!(json["rerank"]["droppedByTruncation"], 3);
        assert_eq!(json["targets"][0]["status"], "degraded");
        assert!(json.get("abortedReason").is_none());
    }
}
