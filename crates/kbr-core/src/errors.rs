//! Error types for kbr-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for kbr-core operations.
pub type KbrResult<T> = Result<T, KbrError>;

/// Domain-specific errors for retrieval operations.
#[derive(Error, Debug)]
pub enum KbrError {
    // =========================================================================
    // Input and configuration
    // =========================================================================
    /// A request argument is invalid. Raised before any stage runs.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Config file invalid: {0}")]
    InvalidConfigFile(String),

    /// A modality name in configuration is not recognized.
    #[error("Unknown retrieval modality `{0}`. Use `vector` or `keyword`.")]
    UnknownModality(String),

    // =========================================================================
    // Backend failures
    // =========================================================================
    /// A backend call failed (network, 5xx, store error).
    #[error("Backend `{backend}` unavailable: {reason}")]
    BackendUnavailable {
        /// Backend that failed.
        backend: String,
        /// Description of the failure.
        reason: String,
    },

    /// A backend call did not finish within its time budget.
    #[error("Backend `{backend}` timed out for knowledge base `{knowledge_base}`")]
    BackendTimeout {
        /// Backend that timed out.
        backend: String,
        /// Knowledge base being queried.
        knowledge_base: String,
    },

    /// Generating the query embedding failed.
    #[error("Embedding with model `{model_id}` failed: {reason}")]
    EmbeddingFailed {
        /// The embedding model.
        model_id: String,
        /// Description of the failure.
        reason: String,
    },

    /// The rerank call failed.
    #[error("Rerank with model `{model_id}` failed: {reason}")]
    RerankFailed {
        /// The rerank model.
        model_id: String,
        /// Description of the failure.
        reason: String,
    },

    /// A rerank batch above the service maximum reached the client.
    #[error("Rerank batch of {requested} passages exceeds the limit of {limit}")]
    RerankBatchTooLarge {
        /// Passages in the rejected batch.
        requested: usize,
        /// Service maximum.
        limit: usize,
    },

    // =========================================================================
    // Fan-in outcomes
    // =========================================================================
    /// Every configured modality failed for one knowledge base.
    #[error("All modalities failed for knowledge base `{knowledge_base}`: {}", .failures.join("; "))]
    TargetFailed {
        /// The failed knowledge base.
        knowledge_base: String,
        /// One message per failed modality.
        failures: Vec<String>,
    },

    /// Every requested knowledge base failed.
    #[error("All knowledge bases failed: {}", .failures.join("; "))]
    AllTargetsFailed {
        /// One message per failed knowledge base.
        failures: Vec<String>,
    },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The request deadline passed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    // =========================================================================
    // Keyword index storage
    // =========================================================================
    /// Reading or writing a keyword index failed.
    #[error("Keyword index I/O error at {path}: {message}")]
    KeywordIndexIo {
        /// The affected path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A keyword index on disk could not be decoded.
    #[error("Keyword index parse error at {path}: {message}")]
    KeywordIndexParse {
        /// The affected path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbrError {
    /// Shorthand for an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Shorthand for a backend failure.
    pub fn backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error comes from the request scope rather than a backend.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Extension trait converting lower-layer results into [`KbrResult`].
///
/// Implemented in `db_adapter` for `kbr-db` results and in `model_adapter`
/// for `kbr-model` results.
pub trait IntoKbrResult<T> {
    fn into_kbr(self) -> KbrResult<T>;
}
