//! Embedding service client.
//!
//! Speaks either the OpenAI-compatible `/embeddings` protocol or Ollama's
//! `/api/embed`. Wire shaping is kept in plain functions so it can be tested
//! without a live service.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

// ============================================================================
// Wire types
// ============================================================================

/// OpenAI-compatible embeddings request.
#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingsRequest<'a> {
    pub model: &'a str,
    pub input: &'a [&'a str],
}

/// OpenAI-compatible embeddings response.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingsResponse {
    pub data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingDatum {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Ollama embed response. The request shape matches [`EmbeddingsRequest`].
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaEmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

/// Put OpenAI-style data back in input order and validate it.
pub(crate) fn order_embeddings(
    model_id: &str,
    mut data: Vec<EmbeddingDatum>,
    expected: usize,
    dimension: usize,
) -> ModelResult<Vec<Vec<f32>>> {
    data.sort_by_key(|d| d.index);
    for (position, datum) in data.iter().enumerate() {
        if datum.index != position {
            return Err(ModelError::invalid_response(
                model_id,
                format!("missing or duplicate embedding index {}", position),
            ));
        }
    }
    check_embeddings(
        model_id,
        data.into_iter().map(|d| d.embedding).collect(),
        expected,
        dimension,
    )
}

/// Validate count and dimension of returned embeddings.
pub(crate) fn check_embeddings(
    model_id: &str,
    vectors: Vec<Vec<f32>>,
    expected: usize,
    dimension: usize,
) -> ModelResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(ModelError::invalid_response(
            model_id,
            format!("expected {} embeddings, got {}", expected, vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(ModelError::invalid_response(
            model_id,
            format!("expected dimension {}, got {}", dimension, bad.len()),
        ));
    }
    Ok(vectors)
}

// ============================================================================
// HttpEmbeddingModel
// ============================================================================

#[cfg(feature = "remote")]
pub use remote::HttpEmbeddingModel;

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
    use crate::http::ServiceClient;
    use crate::EmbeddingModel;
    use tracing::debug;

    /// Embedding model served over HTTP.
    #[derive(Debug)]
    pub struct HttpEmbeddingModel {
        config: EmbeddingConfig,
        client: ServiceClient,
    }

    impl HttpEmbeddingModel {
        pub fn new(config: &EmbeddingConfig) -> ModelResult<Self> {
            config.validate()?;
            debug!(
                "Creating {} embedding client for '{}' at {}",
                config.provider, config.model_id, config.endpoint
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

        fn embed_chunk(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
            let request = EmbeddingsRequest {
                model: &self.config.model_id,
                input: texts,
            };
            let result = match self.config.provider {
                EmbeddingProviderKind::Http => {
                    let response: EmbeddingsResponse =
                        self.client.post_json("embeddings", &request)?;
                    order_embeddings(
                        &self.config.model_id,
                        response.data,
                        texts.len(),
                        self.config.dimension,
                    )
                }
                EmbeddingProviderKind::Ollama => {
                    let response: OllamaEmbedResponse =
                        self.client.post_json("api/embed", &request)?;
                    check_embeddings(
                        &self.config.model_id,
                        response.embeddings,
                        texts.len(),
                        self.config.dimension,
                    )
                }
            };
            result.map_err(|e| match e {
                ModelError::InvalidResponse { message, .. } => {
                    ModelError::embedding_failed(&self.config.model_id, message)
                }
                other => other,
            })
        }
    }

    impl EmbeddingModel for HttpEmbeddingModel {
        fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
            let mut vectors = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(self.config.batch_size.max(1)) {
                vectors.extend(self.embed_chunk(chunk)?);
            }
            Ok(vectors)
        }

        fn dimension(&self) -> usize {
            self.config.dimension
        }

        fn model_id(&self) -> &str {
            &self.config.model_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let input = ["hello", "world"];
        let request = EmbeddingsRequest {
            model: "m",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"model": "m", "input": ["hello", "world"]}));
    }

    #[test]
    fn test_order_embeddings_restores_input_order() {
        let body = r#"{"data": [
            {"index": 1, "embedding": [0.0, 1.0], "object": "embedding"},
            {"index": 0, "embedding": [1.0, 0.0], "object": "embedding"}
        ], "model": "m"}"#;
        let response: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        let vectors = order_embeddings("m", response.data, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_order_embeddings_rejects_gaps() {
        let data = vec![
            EmbeddingDatum {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingDatum {
                index: 2,
                embedding: vec![1.0],
            },
        ];
        assert!(matches!(
            order_embeddings("m", data, 2, 1),
            Err(ModelError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_check_embeddings_count_and_dimension() {
        assert!(check_embeddings("m", vec![vec![1.0, 2.0]], 2, 2).is_err());
        assert!(check_embeddings("m", vec![vec![1.0]], 1, 2).is_err());
        assert!(check_embeddings("m", vec![vec![1.0, 2.0]], 1, 2).is_ok());
    }

    #[test]
    fn test_ollama_response_parsing() {
        let body = r#"{"model": "m", "embeddings": [[0.5, 0.5]]}"#;
        let response: OllamaEmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            check_embeddings("m", response.embeddings, 1, 2).unwrap(),
            vec![vec![0.5, 0.5]]
        );
    }
}
