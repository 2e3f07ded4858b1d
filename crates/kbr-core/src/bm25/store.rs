//! Multi-knowledge-base keyword store.
//!
//! Holds one immutable [`Bm25Index`] per knowledge base. Readers clone the
//! `Arc` under a short read lock and score without holding it; writers build
//! a replacement index and swap it in. Writers are serialized by a separate
//! mutex so concurrent updates to one knowledge base never lose passages.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use super::index::{Bm25Index, Bm25IndexStats, KeywordPassage};
use super::storage::{load_bm25_index, save_bm25_index};
use super::Bm25Config;
use crate::errors::{KbrError, KbrResult};
use crate::pipeline::{NeighborChunk, NeighborSource};
use crate::retriever::{KeywordHit, KeywordIndexBackend};

pub struct KeywordStore {
    config: Bm25Config,
    root: Option<PathBuf>,
    indexes: RwLock<BTreeMap<String, Arc<Bm25Index>>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for KeywordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordStore")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

fn poisoned() -> KbrError {
    KbrError::Other(anyhow::anyhow!("keyword store lock poisoned"))
}

impl KeywordStore {
    /// An in-memory store.
    pub fn new(config: Bm25Config) -> Self {
        Self {
            config,
            root: None,
            indexes: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// A store persisted under `root`, loading every index already there.
    pub fn open(root: impl Into<PathBuf>, config: Bm25Config) -> KbrResult<Self> {
        config.validate()?;
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| KbrError::KeywordIndexIo {
            path: root.clone(),
            message: format!("Failed to create keyword store directory: {}", e),
        })?;

        let mut indexes = BTreeMap::new();
        let entries = fs::read_dir(&root).map_err(|e| KbrError::KeywordIndexIo {
            path: root.clone(),
            message: format!("Failed to list keyword store: {}", e),
        })?;
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some((meta, index)) = load_bm25_index(&path)? {
                indexes.insert(meta.knowledge_base_id, Arc::new(index));
            }
        }

        info!(
            "Opened keyword store at {} with {} knowledge base(s)",
            root.display(),
            indexes.len()
        );

        Ok(Self {
            config,
            root: Some(root),
            indexes: RwLock::new(indexes),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Bm25Config {
        &self.config
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Replace the passages of a knowledge base. Returns the passage count.
    pub fn index_passages(
        &self,
        knowledge_base_id: &str,
        passages: Vec<KeywordPassage>,
    ) -> KbrResult<usize> {
        let _guard = self.writer.lock().map_err(|_| poisoned())?;
        let index = Bm25Index::build(&self.config, passages);
        self.install(knowledge_base_id, index)
    }

    /// Add or update passages of a knowledge base.
    pub fn add_passages(
        &self,
        knowledge_base_id: &str,
        passages: Vec<KeywordPassage>,
    ) -> KbrResult<usize> {
        let _guard = self.writer.lock().map_err(|_| poisoned())?;
        let existing = self.index(knowledge_base_id)?;
        let combined = existing
            .iter()
            .flat_map(|index| index.passages().map(|p| p.to_keyword_passage()))
            .chain(passages);
        let index = Bm25Index::build(&self.config, combined);
        self.install(knowledge_base_id, index)
    }

    /// Remove passages by ID. Returns how many were removed.
    pub fn remove_passages(
        &self,
        knowledge_base_id: &str,
        passage_ids: &[String],
    ) -> KbrResult<usize> {
        let _guard = self.writer.lock().map_err(|_| poisoned())?;
        let Some(existing) = self.index(knowledge_base_id)? else {
            return Ok(0);
        };
        let kept: Vec<KeywordPassage> = existing
            .passages()
            .filter(|p| !passage_ids.contains(&p.passage_id))
            .map(|p| p.to_keyword_passage())
            .collect();
        let removed = existing.len() - kept.len();
        if removed > 0 {
            self.install(knowledge_base_id, Bm25Index::build(&self.config, kept))?;
        }
        Ok(removed)
    }

    /// Forget a knowledge base entirely, on disk too.
    pub fn drop_knowledge_base(&self, knowledge_base_id: &str) -> KbrResult<bool> {
        let _guard = self.writer.lock().map_err(|_| poisoned())?;
        let removed = self
            .indexes
            .write()
            .map_err(|_| poisoned())?
            .remove(knowledge_base_id)
            .is_some();
        if let Some(root) = &self.root {
            let dir = root.join(dir_name(knowledge_base_id));
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| KbrError::KeywordIndexIo {
                    path: dir.clone(),
                    message: format!("Failed to remove keyword index: {}", e),
                })?;
            }
        }
        Ok(removed)
    }

    /// Index of one knowledge base.
    pub fn index(&self, knowledge_base_id: &str) -> KbrResult<Option<Arc<Bm25Index>>> {
        Ok(self
            .indexes
            .read()
            .map_err(|_| poisoned())?
            .get(knowledge_base_id)
            .cloned())
    }

    pub fn knowledge_bases(&self) -> KbrResult<Vec<String>> {
        Ok(self
            .indexes
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect())
    }

    pub fn stats(&self, knowledge_base_id: &str) -> KbrResult<Option<Bm25IndexStats>> {
        Ok(self.index(knowledge_base_id)?.map(|index| index.stats()))
    }

    /// Score one knowledge base. An unknown knowledge base has no matches.
    pub fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
        knowledge_ids: &[String],
    ) -> KbrResult<Vec<KeywordHit>> {
        let Some(index) = self.index(knowledge_base_id)? else {
            debug!("No keyword index for '{}'", knowledge_base_id);
            return Ok(Vec::new());
        };
        Ok(index
            .search(query, top_k, knowledge_ids)
            .into_iter()
            .map(|hit| KeywordHit {
                passage_id: hit.passage.passage_id.clone(),
                knowledge_id: hit.passage.knowledge_id.clone(),
                chunk_index: hit.passage.chunk_index,
                content: hit.passage.content.clone(),
                score: hit.score,
            })
            .collect())
    }

    /// Persist first, then publish, so a failed write leaves the previous
    /// index in service.
    fn install(&self, knowledge_base_id: &str, index: Bm25Index) -> KbrResult<usize> {
        let count = index.len();
        if let Some(root) = &self.root {
            save_bm25_index(&index, knowledge_base_id, &root.join(dir_name(knowledge_base_id)))?;
        }
        self.indexes
            .write()
            .map_err(|_| poisoned())?
            .insert(knowledge_base_id.to_string(), Arc::new(index));
        debug!(
            "Keyword index for '{}' now holds {} passages",
            knowledge_base_id, count
        );
        Ok(count)
    }
}

impl KeywordIndexBackend for KeywordStore {
    fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
        knowledge_ids: &[String],
    ) -> KbrResult<Vec<KeywordHit>> {
        KeywordStore::search(self, knowledge_base_id, query, top_k, knowledge_ids)
    }
}

impl NeighborSource for KeywordStore {
    fn chunk_at(
        &self,
        knowledge_base_id: &str,
        knowledge_id: &str,
        chunk_index: u32,
    ) -> KbrResult<Option<NeighborChunk>> {
        let Some(index) = self.index(knowledge_base_id)? else {
            return Ok(None);
        };
        Ok(index
            .chunk_at(knowledge_id, chunk_index)
            .map(|p| NeighborChunk {
                passage_id: p.passage_id.clone(),
                knowledge_id: p.knowledge_id.clone(),
                chunk_index,
                content: p.content.clone(),
            }))
    }
}

/// Filesystem-safe directory name. IDs that need escaping get a hash suffix
/// so two IDs never share a directory.
fn dir_name(knowledge_base_id: &str) -> String {
    let safe: String = knowledge_base_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == knowledge_base_id {
        return safe;
    }
    let hash = blake3::hash(knowledge_base_id.as_bytes()).to_hex();
    format!("{}-{}", safe, &hash.as_str()[..16])
}
