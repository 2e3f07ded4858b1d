//! Retriever adapters: one per modality.
//!
//! A [`Retriever`] turns a query into scored candidates for one knowledge
//! base. Adapters are synchronous; the composite engine runs them on the
//! blocking pool under the request's deadline. Zero matches is an empty
//! `Ok`, never an error.

mod keyword;
mod vector;

pub use keyword::{KeywordHit, KeywordIndexBackend, KeywordRetriever};
pub use vector::{QueryEmbeddingCache, VectorRetriever, DEFAULT_QUERY_CACHE_CAPACITY};

use crate::errors::{KbrError, KbrResult};
use crate::types::{score_desc, Modality, Query, RetrievalCandidate};

/// One retrieval modality bound to its backend.
pub trait Retriever: Send + Sync {
    fn modality(&self) -> Modality;

    /// Backend name used in diagnostics and errors.
    fn name(&self) -> &str;

    /// At most `top_k` candidates from one knowledge base, best first, none
    /// with a negative score.
    fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &Query,
        top_k: usize,
    ) -> KbrResult<Vec<RetrievalCandidate>>;
}

/// Argument checks shared by every adapter.
pub fn check_request(knowledge_base_id: &str, top_k: usize) -> KbrResult<()> {
    if knowledge_base_id.trim().is_empty() {
        return Err(KbrError::InvalidArgument(
            "knowledge base ID must not be empty".to_string(),
        ));
    }
    if top_k == 0 {
        return Err(KbrError::InvalidArgument(
            "topK must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Drop negative and NaN scores, sort best first and cap at `top_k`.
///
/// Backends already sort, but adapters do not rely on it.
pub fn finalize(mut candidates: Vec<RetrievalCandidate>, top_k: usize) -> Vec<RetrievalCandidate> {
    candidates.retain(|c| c.score >= 0.0);
    candidates.sort_by(|a, b| score_desc(a.score, b.score).then_with(|| a.provenance_cmp(b)));
    candidates.truncate(top_k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchType;

    fn candidate(id: &str, score: f32) -> RetrievalCandidate {
        RetrievalCandidate::new(id, "kb", "doc", "text", score, MatchType::Vector)
    }

    #[test]
    fn test_check_request() {
        assert!(check_request("kb", 1).is_ok());
        assert!(matches!(
            check_request(" ", 1),
            Err(KbrError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_request("kb", 0),
            Err(KbrError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_finalize_drops_invalid_scores_and_sorts() {
        let out = finalize(
            vec![
                candidate("c", 0.2),
                candidate("neg", -0.1),
                candidate("nan", f32::NAN),
                candidate("b", 0.9),
                candidate("a", 0.9),
                candidate("zero", 0.0),
            ],
            3,
        );
        let ids: Vec<&str> = out.iter().map(|c| c.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
