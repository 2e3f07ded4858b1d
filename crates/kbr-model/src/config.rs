//! Configuration types for kbr-model.
//!
//! These are the canonical service configurations; `kbr-core` embeds them in
//! its own config file rather than defining duplicates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModelError, ModelResult};
use crate::{DEFAULT_EMBEDDING_MODEL_ID, DEFAULT_RERANKER_MODEL_ID};

// ============================================================================
// EmbeddingProviderKind
// ============================================================================

/// Wire protocol spoken by the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `POST {endpoint}/embeddings`.
    #[default]
    Http,
    /// Ollama `POST {endpoint}/api/embed`.
    Ollama,
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "openai" => Ok(Self::Http),
            "ollama" => Ok(Self::Ollama),
            _ => Err(format!(
                "Unknown provider: '{}'. Use 'http' or 'ollama'.",
                s
            )),
        }
    }
}

// ============================================================================
// EmbeddingConfig
// ============================================================================

/// Configuration for the embedding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_model_id")]
    pub model_id: String,

    /// Base URL of the service.
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Expected embedding dimension. Responses of another size are rejected.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum texts per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_model_id() -> String {
    DEFAULT_EMBEDDING_MODEL_ID.to_string()
}

fn default_embedding_endpoint() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model_id: default_embedding_model_id(),
            endpoint: default_embedding_endpoint(),
            api_key_env: None,
            dimension: default_dimension(),
            timeout_ms: default_timeout_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    /// Create a config with a specific model ID.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Create a config with a specific endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject values that make every request fail.
    pub fn validate(&self) -> ModelResult<()> {
        validate_common(&self.endpoint, &self.model_id, self.timeout_ms)?;
        if self.dimension == 0 {
            return Err(ModelError::invalid_config(
                "embedding.dimension must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::invalid_config(
                "embedding.batchSize must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RerankerConfig
// ============================================================================

/// Configuration for the rerank service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model_id")]
    pub model_id: String,

    /// Base URL of the service (`POST {endpoint}/rerank`).
    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Documented maximum number of passages per request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_reranker_model_id() -> String {
    DEFAULT_RERANKER_MODEL_ID.to_string()
}

fn default_reranker_endpoint() -> String {
    "http://localhost:8081/v1".to_string()
}

fn default_max_batch_size() -> usize {
    32
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model_id: default_reranker_model_id(),
            endpoint: default_reranker_endpoint(),
            api_key_env: None,
            max_batch_size: default_max_batch_size(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RerankerConfig {
    /// Create a config with a specific model ID.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Create a config with a specific endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the documented batch limit.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject values that make every request fail.
    pub fn validate(&self) -> ModelResult<()> {
        validate_common(&self.endpoint, &self.model_id, self.timeout_ms)?;
        if self.max_batch_size == 0 {
            return Err(ModelError::invalid_config(
                "reranker.maxBatchSize must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn validate_common(endpoint: &str, model_id: &str, timeout_ms: u64) -> ModelResult<()> {
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ModelError::invalid_config(format!(
            "endpoint '{}' must start with http:// or https://",
            endpoint
        )));
    }
    if model_id.trim().is_empty() {
        return Err(ModelError::invalid_config("modelId must not be empty"));
    }
    if timeout_ms == 0 {
        return Err(ModelError::invalid_config(
            "timeoutMs must be greater than 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(
            "openai".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Http
        );
        assert_eq!(
            "Ollama".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Ollama
        );
        assert!("candle".parse::<EmbeddingProviderKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let embedding = EmbeddingConfig::default();
        assert_eq!(embedding.provider, EmbeddingProviderKind::Http);
        assert_eq!(embedding.model_id, DEFAULT_EMBEDDING_MODEL_ID);
        assert!(embedding.validate().is_ok());

        let reranker = RerankerConfig::default();
        assert_eq!(reranker.model_id, DEFAULT_RERANKER_MODEL_ID);
        assert_eq!(reranker.max_batch_size, 32);
        assert!(reranker.validate().is_ok());
    }

    #[test]
    fn test_camel_case_deserialization_with_defaults() {
        let json = r#"{"maxBatchSize": 8, "apiKeyEnv": "RERANK_KEY"}"#;
        let config: RerankerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.api_key_env.as_deref(), Some("RERANK_KEY"));
        assert_eq!(config.timeout_ms, 10_000);
    }

    #[test]
    fn test_validation_failures() {
        let zero_batch = RerankerConfig::default().with_max_batch_size(0);
        assert!(zero_batch.validate().is_err());

        let bad_endpoint = EmbeddingConfig::default().with_endpoint("localhost:8080");
        assert!(bad_endpoint.validate().is_err());

        let no_model = EmbeddingConfig::default().with_model_id(" ");
        assert!(no_model.validate().is_err());
    }
}
