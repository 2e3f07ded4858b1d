//! Domain types shared by every retrieval stage.
//!
//! Candidates are values: stages build new ones instead of editing scores in
//! place, so provenance from earlier stages stays available for diagnostics.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{KbrError, KbrResult};

// ============================================================================
// Modality and match type
// ============================================================================

/// A retrieval method run against one knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Vector,
    Keyword,
}

impl Modality {
    /// Every modality, in canonical order.
    pub const ALL: [Modality; 2] = [Modality::Vector, Modality::Keyword];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Vector => "vector",
            Modality::Keyword => "keyword",
        }
    }

    /// The match type carried by candidates of this modality.
    pub fn match_type(&self) -> MatchType {
        match self {
            Modality::Vector => MatchType::Vector,
            Modality::Keyword => MatchType::Keyword,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = KbrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vector" | "dense" | "embedding" => Ok(Modality::Vector),
            "keyword" | "bm25" | "fulltext" => Ok(Modality::Keyword),
            other => Err(KbrError::UnknownModality(other.to_string())),
        }
    }
}

/// How a passage came to be a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    Vector,
    Keyword,
    /// Pulled in because an adjacent chunk matched directly.
    NeighborExpansion,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Vector => "vector",
            MatchType::Keyword => "keyword",
            MatchType::NeighborExpansion => "neighbor-expansion",
        }
    }

    /// Whether the passage matched the query itself.
    pub fn is_direct(&self) -> bool {
        !matches!(self, MatchType::NeighborExpansion)
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PassageId
// ============================================================================

/// Identifier of a chunk within the platform. Ordered for tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(String);

impl PassageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PassageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PassageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Query
// ============================================================================

/// Inbound query as received from the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(rename = "knowledgeBaseIDs", alias = "knowledgeBaseIds")]
    pub knowledge_base_ids: Vec<String>,
    /// Restricts retrieval to these documents when non-empty.
    #[serde(default, rename = "knowledgeIDs", alias = "knowledgeIds")]
    pub knowledge_ids: Vec<String>,
}

impl QueryRequest {
    pub fn new<I, S>(query: impl Into<String>, knowledge_base_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query: query.into(),
            knowledge_base_ids: knowledge_base_ids.into_iter().map(Into::into).collect(),
            knowledge_ids: Vec::new(),
        }
    }

    pub fn with_knowledge_ids<I, S>(mut self, knowledge_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.knowledge_ids = knowledge_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Reject malformed input and freeze the query.
    pub fn validate(self) -> KbrResult<Query> {
        let text = self.query.trim();
        if text.is_empty() {
            return Err(KbrError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        if self.knowledge_base_ids.is_empty() {
            return Err(KbrError::InvalidArgument(
                "at least one knowledge base ID is required".to_string(),
            ));
        }
        if let Some(pos) = self
            .knowledge_base_ids
            .iter()
            .position(|id| id.trim().is_empty())
        {
            return Err(KbrError::InvalidArgument(format!(
                "knowledge base ID at position {} is empty",
                pos
            )));
        }
        if self.knowledge_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(KbrError::InvalidArgument(
                "knowledge IDs must not be empty".to_string(),
            ));
        }

        let knowledge_ids: BTreeSet<String> = self
            .knowledge_ids
            .iter()
            .map(|id| id.trim().to_string())
            .collect();

        Ok(Query {
            text: text.to_string(),
            knowledge_base_ids: self
                .knowledge_base_ids
                .iter()
                .map(|id| id.trim().to_string())
                .collect(),
            knowledge_ids: knowledge_ids.into_iter().collect(),
        })
    }
}

/// A validated query. Immutable once the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    knowledge_base_ids: Vec<String>,
    knowledge_ids: Vec<String>,
}

impl Query {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Knowledge base IDs as requested, duplicates included.
    pub fn knowledge_base_ids(&self) -> &[String] {
        &self.knowledge_base_ids
    }

    /// Distinct knowledge base IDs in ascending order.
    pub fn distinct_knowledge_bases(&self) -> Vec<String> {
        self.knowledge_base_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Document restriction, sorted and deduplicated. Empty means none.
    pub fn knowledge_ids(&self) -> &[String] {
        &self.knowledge_ids
    }

    /// Whether a document passes the restriction.
    pub fn allows_knowledge(&self, knowledge_id: &str) -> bool {
        self.knowledge_ids.is_empty()
            || self
                .knowledge_ids
                .binary_search_by(|k| k.as_str().cmp(knowledge_id))
                .is_ok()
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A scored reference to a passage, produced by one modality for one
/// knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalCandidate {
    pub passage_id: PassageId,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    pub content: String,
    /// Modality-specific, non-negative.
    pub score: f32,
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

impl RetrievalCandidate {
    pub fn new(
        passage_id: impl Into<PassageId>,
        knowledge_base_id: impl Into<String>,
        knowledge_id: impl Into<String>,
        content: impl Into<String>,
        score: f32,
        match_type: MatchType,
    ) -> Self {
        Self {
            passage_id: passage_id.into(),
            knowledge_id: knowledge_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            content: content.into(),
            score,
            match_type,
            chunk_index: None,
        }
    }

    pub fn with_chunk_index(mut self, chunk_index: u32) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    /// A copy of this candidate with a different score and match type.
    pub fn derive(&self, score: f32, match_type: MatchType) -> Self {
        Self {
            score,
            match_type,
            ..self.clone()
        }
    }

    /// Total order used wherever candidates with equal scores must be
    /// arranged deterministically.
    pub fn provenance_cmp(&self, other: &Self) -> Ordering {
        self.passage_id
            .cmp(&other.passage_id)
            .then_with(|| self.knowledge_base_id.cmp(&other.knowledge_base_id))
            .then_with(|| self.match_type.cmp(&other.match_type))
    }
}

/// Rerank outcome for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankInfo {
    pub score: f32,
    /// 1-based position among reranked candidates.
    pub rank: usize,
}

/// A candidate after the rerank stage. `rerank` is `None` when reranking
/// was disabled or fell back to the pre-rerank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankedCandidate {
    pub candidate: RetrievalCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankInfo>,
}

impl RerankedCandidate {
    pub fn passthrough(candidate: RetrievalCandidate) -> Self {
        Self {
            candidate,
            rerank: None,
        }
    }

    pub fn reranked(candidate: RetrievalCandidate, score: f32, rank: usize) -> Self {
        Self {
            candidate,
            rerank: Some(RerankInfo { score, rank }),
        }
    }

    /// Rerank score if present, else the raw modality score.
    pub fn effective_score(&self) -> f32 {
        self.rerank
            .map(|r| r.score)
            .unwrap_or(self.candidate.score)
    }
}

/// One passage after deduplication and optional adjacency merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPassage {
    pub passage_id: PassageId,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    pub content: String,
    /// Effective score used for ranking.
    pub score: f32,
    /// Raw modality score of the winning entry.
    pub raw_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// Match type of the winning entry.
    pub match_type: MatchType,
    /// Every match type seen for this passage, sorted.
    pub match_types: Vec<MatchType>,
    /// Passages folded into this entry by adjacency merging, including itself.
    pub merged_passage_ids: Vec<PassageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

impl MergedPassage {
    pub fn from_reranked(entry: &RerankedCandidate) -> Self {
        let c = &entry.candidate;
        Self {
            passage_id: c.passage_id.clone(),
            knowledge_id: c.knowledge_id.clone(),
            knowledge_base_id: c.knowledge_base_id.clone(),
            content: c.content.clone(),
            score: entry.effective_score(),
            raw_score: c.score,
            rerank_score: entry.rerank.map(|r| r.score),
            match_type: c.match_type,
            match_types: vec![c.match_type],
            merged_passage_ids: vec![c.passage_id.clone()],
            chunk_index: c.chunk_index,
        }
    }

    pub fn has_match_type(&self, match_type: MatchType) -> bool {
        self.match_types.contains(&match_type)
    }
}

/// One entry of the ranked list returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    #[serde(rename = "passageID")]
    pub passage_id: PassageId,
    pub content: String,
    pub score: f32,
    pub match_type: MatchType,
    pub match_types: Vec<MatchType>,
    #[serde(rename = "knowledgeID")]
    pub knowledge_id: String,
    #[serde(rename = "knowledgeBaseID")]
    pub knowledge_base_id: String,
}

impl From<MergedPassage> for SearchResultItem {
    fn from(p: MergedPassage) -> Self {
        Self {
            passage_id: p.passage_id,
            content: p.content,
            score: p.score,
            match_type: p.match_type,
            match_types: p.match_types,
            knowledge_id: p.knowledge_id,
            knowledge_base_id: p.knowledge_base_id,
        }
    }
}

/// Descending score order. NaN never reaches ranking, `total_cmp` keeps the
/// order total anyway.
pub(crate) fn score_desc(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_parsing() {
        assert_eq!("Vector".parse::<Modality>().unwrap(), Modality::Vector);
        assert_eq!("bm25".parse::<Modality>().unwrap(), Modality::Keyword);
        assert!(matches!(
            "graph".parse::<Modality>(),
            Err(KbrError::UnknownModality(_))
        ));
    }

    #[test]
    fn test_match_type_serialization() {
        let json = serde_json::to_string(&MatchType::NeighborExpansion).unwrap();
        assert_eq!(json, "\"neighbor-expansion\"");
        assert!(!MatchType::NeighborExpansion.is_direct());
        assert!(MatchType::Keyword.is_direct());
        assert_eq!(Modality::Keyword.match_type(), MatchType::Keyword);
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let err = QueryRequest::new("   ", ["kb-1"]).validate().unwrap_err();
        assert!(matches!(err, KbrError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_malformed_knowledge_base_list() {
        let none: [&str; 0] = [];
        assert!(QueryRequest::new("q", none).validate().is_err());
        assert!(QueryRequest::new("q", ["kb-1", " "]).validate().is_err());
        assert!(QueryRequest::new("q", ["kb-1"])
            .with_knowledge_ids([""])
            .validate()
            .is_err());
    }

    #[test]
    fn test_query_distinct_targets_are_sorted() {
        let query = QueryRequest::new(" hello ", ["kb-2", "kb-1", "kb-2"])
            .validate()
            .unwrap();
        assert_eq!(query.text(), "hello");
        assert_eq!(query.knowledge_base_ids().len(), 3);
        assert_eq!(query.distinct_knowledge_bases(), vec!["kb-1", "kb-2"]);
    }

    #[test]
    fn test_document_restriction() {
        let open = QueryRequest::new("q", ["kb"]).validate().unwrap();
        assert!(open.allows_knowledge("anything"));

        let restricted = QueryRequest::new("q", ["kb"])
            .with_knowledge_ids(["doc-b", "doc-a", "doc-b"])
            .validate()
            .unwrap();
        assert_eq!(restricted.knowledge_ids(), ["doc-a", "doc-b"]);
        assert!(restricted.allows_knowledge("doc-a"));
        assert!(!restricted.allows_knowledge("doc-c"));
    }

    #[test]
    fn test_request_wire_names() {
        let json = r#"{"query": "q", "knowledgeBaseIDs": ["kb"], "knowledgeIDs": ["d"]}"#;
        let request: QueryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.knowledge_base_ids, vec!["kb"]);
        assert_eq!(request.knowledge_ids, vec!["d"]);
    }

    #[test]
    fn test_effective_score_prefers_rerank() {
        let c = RetrievalCandidate::new("p", "kb", "d", "text", 0.4, MatchType::Vector);
        assert_eq!(RerankedCandidate::passthrough(c.clone()).effective_score(), 0.4);
        assert_eq!(RerankedCandidate::reranked(c, 0.9, 1).effective_score(), 0.9);
    }

    #[test]
    fn test_derive_keeps_original() {
        let c = RetrievalCandidate::new("p", "kb", "d", "text", 0.4, MatchType::Vector)
            .with_chunk_index(3);
        let n = c.derive(0.2, MatchType::NeighborExpansion);
        assert_eq!(c.score, 0.4);
        assert_eq!(c.match_type, MatchType::Vector);
        assert_eq!(n.score, 0.2);
        assert_eq!(n.chunk_index, Some(3));
    }

    #[test]
    fn test_search_result_wire_shape() {
        let c = RetrievalCandidate::new("p-1", "kb-1", "doc-1", "text", 0.5, MatchType::Keyword);
        let item = SearchResultItem::from(MergedPassage::from_reranked(
            &RerankedCandidate::passthrough(c),
        ));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["passageID"], "p-1");
        assert_eq!(json["knowledgeID"], "doc-1");
        assert_eq!(json["knowledgeBaseID"], "kb-1");
        assert_eq!(json["matchType"], "keyword");
    }

    #[test]
    fn test_score_desc_orders_high_first() {
        let mut scores = vec![0.1_f32, 0.9, 0.5];
        scores.sort_by(|a, b| score_desc(*a, *b));
        assert_eq!(scores, vec![0.9, 0.5, 0.1]);
    }
}
