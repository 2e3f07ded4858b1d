//! Vector index configuration and the on-disk `index.meta.json` record.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::VectorMetric;
use crate::error::{DbError, DbResult};

pub const DEFAULT_BACKEND: &str = "simple";

/// Backend name for a non-persistent index.
pub const MEMORY_BACKEND: &str = "memory";

pub const INDEX_META_FILENAME: &str = "index.meta.json";

/// Bumped when the JSONL record layout changes.
const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// VectorIndexConfig
// ============================================================================

/// How to open a vector index shared by every knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexConfig {
    pub dimension: usize,

    /// Index directory. Ignored by the `memory` backend.
    #[serde(default)]
    pub path: PathBuf,

    /// `simple` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub metric: VectorMetric,

    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_create_if_missing() -> bool {
    true
}

impl VectorIndexConfig {
    pub fn new(dimension: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            path: path.into(),
            backend: default_backend(),
            metric: VectorMetric::Cosine,
            create_if_missing: true,
        }
    }

    pub fn in_memory(dimension: usize) -> Self {
        Self::new(dimension, PathBuf::new()).with_backend(MEMORY_BACKEND)
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_metric(mut self, metric: VectorMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.backend != MEMORY_BACKEND
    }
}

// ============================================================================
// VectorIndexMeta
// ============================================================================

/// What a persisted index holds: its shape and the knowledge bases with a
/// collection in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexMeta {
    pub backend: String,
    pub dimension: usize,
    pub metric: VectorMetric,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub knowledge_bases: Vec<String>,
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl VectorIndexMeta {
    /// Metadata for a fresh, empty index described by `config`.
    pub fn for_config(config: &VectorIndexConfig) -> Self {
        Self::new(config.backend.clone(), config.dimension, config.metric)
    }

    pub fn new(backend: impl Into<String>, dimension: usize, metric: VectorMetric) -> Self {
        let now = Utc::now();
        Self {
            backend: backend.into(),
            dimension,
            metric,
            count: 0,
            knowledge_bases: Vec::new(),
            schema_version: SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the contents after a flush.
    pub fn update_contents(&mut self, count: usize, knowledge_bases: Vec<String>) {
        self.count = count;
        self.knowledge_bases = knowledge_bases;
        self.updated_at = Utc::now();
    }

    /// Why an index with this metadata cannot be opened with `config`.
    pub fn mismatch(&self, config: &VectorIndexConfig) -> Option<DbError> {
        if self.dimension != config.dimension {
            return Some(DbError::DimensionMismatch {
                expected: config.dimension,
                actual: self.dimension,
            });
        }
        let reason = if self.backend != config.backend {
            format!(
                "Backend mismatch: expected '{}', found '{}'",
                config.backend, self.backend
            )
        } else if self.metric != config.metric {
            format!(
                "Metric mismatch: expected '{}', found '{}'",
                config.metric, self.metric
            )
        } else if self.schema_version > SCHEMA_VERSION {
            format!(
                "Schema version {} is newer than supported {}",
                self.schema_version, SCHEMA_VERSION
            )
        } else {
            return None;
        };
        Some(DbError::index_incompatible(&config.path, reason))
    }
}

// ============================================================================
// Index directory
// ============================================================================

/// What sits at an index path.
#[derive(Debug)]
pub enum IndexState {
    /// Nothing, or an empty directory.
    Missing,
    Present(VectorIndexMeta),
}

/// Inspect an index directory.
///
/// # Errors
///
/// A non-empty directory without metadata, or metadata that cannot be
/// read, is [`DbError::IndexIncompatible`].
pub fn inspect_index(path: &Path) -> DbResult<IndexState> {
    if path.join(INDEX_META_FILENAME).exists() {
        return load_index_meta(path)
            .map(IndexState::Present)
            .map_err(|e| DbError::index_incompatible(path, format!("Index corrupted: {}", e)));
    }
    let has_files = path.is_dir() && fs::read_dir(path)?.next().is_some();
    if has_files {
        return Err(DbError::index_incompatible(
            path,
            "Index corrupted: directory exists but has no metadata",
        ));
    }
    Ok(IndexState::Missing)
}

pub fn load_index_meta(path: &Path) -> DbResult<VectorIndexMeta> {
    let meta_path = path.join(INDEX_META_FILENAME);
    debug!("Loading index metadata from {:?}", meta_path);

    let content = fs::read_to_string(&meta_path)
        .map_err(|e| DbError::vector_io(&meta_path, e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| DbError::vector_parse(meta_path, e.to_string()))
}

pub fn write_index_meta(path: &Path, meta: &VectorIndexMeta) -> DbResult<()> {
    fs::create_dir_all(path)?;
    let content = serde_json::to_string_pretty(meta)?;
    fs::write(path.join(INDEX_META_FILENAME), content)?;
    Ok(())
}
