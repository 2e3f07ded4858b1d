//! Rerank service client.
//!
//! The service accepts `{model, query, documents}` and answers with
//! `{results: [{index, relevance_score}]}`. It documents a maximum number of
//! documents per request; the client checks it before sending anything.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct RerankRequest<'a> {
    pub model: &'a str,
    pub query: &'a str,
    pub documents: &'a [String],
    pub top_n: usize,
    pub return_documents: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RerankResponse {
    pub results: Vec<RerankHit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RerankHit {
    pub index: usize,
    #[serde(alias = "score")]
    pub relevance_score: f32,
}

/// Refuse batches above the documented maximum.
pub fn check_batch_size(requested: usize, limit: usize) -> ModelResult<()> {
    if requested > limit {
        return Err(ModelError::BatchTooLarge { requested, limit });
    }
    Ok(())
}

/// Map hits back to one score per input document, in input order.
pub(crate) fn scores_in_order(
    model_id: &str,
    hits: Vec<RerankHit>,
    expected: usize,
) -> ModelResult<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| {
            ModelError::invalid_response(
                model_id,
                format!("result index {} out of range {}", hit.index, expected),
            )
        })?;
        if slot.replace(hit.relevance_score).is_some() {
            return Err(ModelError::invalid_response(
                model_id,
                format!("duplicate result index {}", hit.index),
            ));
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| {
            score.ok_or_else(|| {
                ModelError::invalid_response(model_id, format!("no score for document {}", i))
            })
        })
        .collect()
}

// ============================================================================
// HttpRerankerModel
// ============================================================================

#[cfg(feature = "remote")]
pub use remote::HttpRerankerModel;

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use crate::config::RerankerConfig;
    use crate::http::ServiceClient;
    use crate::RerankerModel;
    use tracing::debug;

    /// Cross-encoder reranker served over HTTP.
    #[derive(Debug)]
    pub struct HttpRerankerModel {
        config: RerankerConfig,
        client: ServiceClient,
    }

    impl HttpRerankerModel {
        pub fn new(config: &RerankerConfig) -> ModelResult<Self> {
            config.validate()?;
            debug!(
                "Creating rerank client for '{}' at {} (max batch {})",
                config.model_id, config.endpoint, config.max_batch_size
            );
            Ok(Self {
                client: ServiceClient::new(
                    &config.endpoint,
                    config.api_key_env.as_deref(),
                    config.timeout(),
                ),
                config: config.clone(),
            })
        }
    }

    impl RerankerModel for HttpRerankerModel {
        fn score_batch(&self, query: &str, documents: &[String]) -> ModelResult<Vec<f32>> {
            if documents.is_empty() {
                return Ok(Vec::new());
            }
            check_batch_size(documents.len(), self.config.max_batch_size)?;

            let request = RerankRequest {
                model: &self.config.model_id,
                query,
                documents,
                top_n: documents.len(),
                return_documents: false,
            };
            let response: RerankResponse = self.client.post_json("rerank", &request)?;
            scores_in_order(&self.config.model_id, response.results, documents.len()).map_err(
                |e| match e {
                    ModelError::InvalidResponse { message, .. } => {
                        ModelError::reranking_failed(&self.config.model_id, message)
                    }
                    other => other,
                },
            )
        }

        fn model_id(&self) -> &str {
            &self.config.model_id
        }

        fn max_batch_size(&self) -> Option<usize> {
            Some(self.config.max_batch_size)
        }
    }
}
