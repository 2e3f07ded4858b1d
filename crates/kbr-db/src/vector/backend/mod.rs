//! Vector index backend implementations.
//!
//! ## Available Backends
//!
//! - `simple` (default): JSONL file with linear scan
//! - `memory`: the same engine without persistence

#[cfg(feature = "simple")]
mod simple;

#[cfg(feature = "simple")]
pub use simple::SimpleVectorIndex;

use super::config::{inspect_index, write_index_meta, IndexState, VectorIndexConfig, VectorIndexMeta};
use super::traits::VectorIndexBackend;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Open a vector index with the given configuration.
///
/// Persistent backends are checked for compatibility first and created when
/// missing (if `create_if_missing` is set).
///
/// # Errors
///
/// Returns an error if:
/// - The index exists but is incompatible
/// - The backend is not supported
/// - The index cannot be created or opened
pub fn open_vector_index(config: &VectorIndexConfig) -> DbResult<Arc<dyn VectorIndexBackend>> {
    if config.dimension == 0 {
        return Err(DbError::config("Vector dimension must be greater than 0"));
    }

    if !available_backends().contains(&config.backend.as_str()) {
        return Err(DbError::config(format!(
            "Unknown backend: '{}'. Available backends: {}",
            config.backend,
            available_backends().join(", ")
        )));
    }

    if config.is_persistent() {
        debug!("Opening vector index at {:?}", config.path);
        ensure_compatible(config)?;
    }

    match config.backend.as_str() {
        #[cfg(feature = "simple")]
        "simple" => Ok(Arc::new(SimpleVectorIndex::open(config)?)),

        #[cfg(feature = "simple")]
        "memory" => Ok(Arc::new(SimpleVectorIndex::in_memory(
            config.dimension,
            config.metric,
        ))),

        backend => Err(DbError::config(format!(
            "Backend '{}' is not available (feature not enabled)",
            backend
        ))),
    }
}

fn ensure_compatible(config: &VectorIndexConfig) -> DbResult<()> {
    match inspect_index(&config.path)? {
        IndexState::Present(meta) => match meta.mismatch(config) {
            Some(err) => Err(err),
            None => {
                debug!(
                    "Index is compatible: {} vectors across {} knowledge bases",
                    meta.count,
                    meta.knowledge_bases.len()
                );
                Ok(())
            }
        },
        IndexState::Missing if config.create_if_missing => {
            info!("Index not found, creating new index at {:?}", config.path);
            write_index_meta(&config.path, &VectorIndexMeta::for_config(config))
        }
        IndexState::Missing => Err(DbError::IndexNotFound {
            path: config.path.clone(),
        }),
    }
}

/// Get a list of available backend names.
#[allow(clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();

    #[cfg(feature = "simple")]
    {
        backends.push("simple");
        backends.push("memory");
    }

    backends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{VectorInsert, VectorMetric};
    use tempfile::TempDir;

    #[test]
    fn test_available_backends() {
        let backends = available_backends();
        assert!(backends.contains(&"simple"));
        assert!(backends.contains(&"memory"));
    }

    #[test]
    fn test_open_creates_missing_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors");
        let config = VectorIndexConfig::new(2, &path);

        let index = open_vector_index(&config).unwrap();
        assert_eq!(index.dimension(), 2);
        assert!(path.join("index.meta.json").exists());
    }

    #[test]
    fn test_open_rejects_missing_when_not_creating() {
        let dir = TempDir::new().unwrap();
        let config =
            VectorIndexConfig::new(2, dir.path().join("absent")).with_create_if_missing(false);
        assert!(matches!(
            open_vector_index(&config),
            Err(DbError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_open_rejects_metric_change() {
        let dir = TempDir::new().unwrap();
        let config = VectorIndexConfig::new(2, dir.path());
        open_vector_index(&config).unwrap();

        let changed = config.clone().with_metric(VectorMetric::Dot);
        assert!(matches!(
            open_vector_index(&changed),
            Err(DbError::IndexIncompatible { .. })
        ));
    }

    #[test]
    fn test_memory_backend_and_unknown_backend() {
        let index = open_vector_index(&VectorIndexConfig::in_memory(2)).unwrap();
        index
            .upsert(&[VectorInsert::new("kb", "p", vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(index.len().unwrap(), 1);

        let config = VectorIndexConfig::in_memory(2).with_backend("hnsw");
        assert!(matches!(
            open_vector_index(&config),
            Err(DbError::Config { .. })
        ));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(open_vector_index(&VectorIndexConfig::in_memory(0)).is_err());
    }
}
