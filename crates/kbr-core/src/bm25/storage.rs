//! BM25 index persistence.
//!
//! One directory per knowledge base:
//!
//! ```text
//! <root>/<knowledge-base dir>/
//! ├── index.bin   # bincode-encoded Bm25Index
//! └── meta.json   # version, knowledge base ID, stats
//! ```

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::config;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::index::{Bm25Index, Bm25IndexStats};
use crate::errors::{KbrError, KbrResult};

pub const INDEX_FILENAME: &str = "index.bin";
pub const META_FILENAME: &str = "meta.json";

/// Sidecar metadata written next to every saved index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25IndexMeta {
    pub version: u32,
    /// The directory name is sanitized; this is the real ID.
    pub knowledge_base_id: String,
    pub stats: Bm25IndexStats,
    pub built_at: DateTime<Utc>,
}

impl Bm25IndexMeta {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(knowledge_base_id: impl Into<String>, stats: Bm25IndexStats) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            knowledge_base_id: knowledge_base_id.into(),
            stats,
            built_at: Utc::now(),
        }
    }
}

fn io_error(path: &Path, what: &str, e: impl std::fmt::Display) -> KbrError {
    KbrError::KeywordIndexIo {
        path: path.to_path_buf(),
        message: format!("{}: {}", what, e),
    }
}

fn parse_error(path: &Path, what: &str, e: impl std::fmt::Display) -> KbrError {
    KbrError::KeywordIndexParse {
        path: path.to_path_buf(),
        message: format!("{}: {}", what, e),
    }
}

/// Write an index and its metadata into `dir`, creating it if needed.
pub fn save_bm25_index(index: &Bm25Index, knowledge_base_id: &str, dir: &Path) -> KbrResult<()> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, "Failed to create BM25 directory", e))?;

    let index_file = dir.join(INDEX_FILENAME);
    let file = fs::File::create(&index_file)
        .map_err(|e| io_error(&index_file, "Failed to create BM25 index file", e))?;
    let mut writer = BufWriter::new(file);
    bincode::encode_into_std_write(index, &mut writer, config::standard())
        .map_err(|e| parse_error(&index_file, "Failed to encode BM25 index", e))?;

    let meta_file = dir.join(META_FILENAME);
    let meta = Bm25IndexMeta::new(knowledge_base_id, index.stats());
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| parse_error(&meta_file, "Failed to encode BM25 metadata", e))?;
    fs::write(&meta_file, json)
        .map_err(|e| io_error(&meta_file, "Failed to write BM25 metadata", e))?;

    tracing::debug!(
        "Saved BM25 index for '{}' to {}: {} passages, {} terms",
        knowledge_base_id,
        dir.display(),
        meta.stats.num_passages,
        meta.stats.vocabulary_size
    );
    Ok(())
}

/// Read an index saved by [`save_bm25_index`].
///
/// Returns `None` when `dir` holds no index or one written by an
/// incompatible version.
pub fn load_bm25_index(dir: &Path) -> KbrResult<Option<(Bm25IndexMeta, Bm25Index)>> {
    let index_file = dir.join(INDEX_FILENAME);
    let meta_file = dir.join(META_FILENAME);

    if !index_file.exists() || !meta_file.exists() {
        tracing::debug!("No BM25 index found at {}", dir.display());
        return Ok(None);
    }

    let content = fs::read_to_string(&meta_file)
        .map_err(|e| io_error(&meta_file, "Failed to read BM25 metadata", e))?;
    let meta: Bm25IndexMeta = serde_json::from_str(&content)
        .map_err(|e| parse_error(&meta_file, "Failed to parse BM25 metadata", e))?;

    if meta.version != Bm25IndexMeta::CURRENT_VERSION {
        tracing::warn!(
            "BM25 index at {} has version {}, expected {}; ignoring it",
            dir.display(),
            meta.version,
            Bm25IndexMeta::CURRENT_VERSION
        );
        return Ok(None);
    }

    let file = fs::File::open(&index_file)
        .map_err(|e| io_error(&index_file, "Failed to open BM25 index", e))?;
    let mut reader = BufReader::new(file);
    let index: Bm25Index = bincode::decode_from_std_read(&mut reader, config::standard())
        .map_err(|e| parse_error(&index_file, "Failed to decode BM25 index", e))?;

    tracing::debug!(
        "Loaded BM25 index for '{}' from {}: {} passages",
        meta.knowledge_base_id,
        dir.display(),
        index.len()
    );
    Ok(Some((meta, index)))
}
