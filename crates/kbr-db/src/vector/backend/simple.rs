//! Simple vector index backend.
//!
//! Stores one collection per knowledge base and searches with a linear scan.
//! With a directory it persists every collection to a single JSONL file;
//! the `memory` flavour keeps everything in process memory.

use super::super::config::{
    load_index_meta, write_index_meta, VectorIndexConfig, VectorIndexMeta,
};
use super::super::filter::VectorSearchFilter;
use super::super::traits::{VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult};
use crate::error::{DbError, DbResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Filename for the JSONL data file.
const DATA_FILENAME: &str = "vectors.jsonl";

/// Collections keyed by knowledge base, then passage ID.
type Collections = BTreeMap<String, HashMap<String, VectorInsert>>;

/// Simple vector index with per-knowledge-base collections.
pub struct SimpleVectorIndex {
    /// Index directory, `None` for in-memory indexes.
    path: Option<PathBuf>,

    dimension: usize,

    metric: VectorMetric,

    collections: RwLock<Collections>,
}

impl SimpleVectorIndex {
    /// Open or create a file-backed index.
    pub fn open(config: &VectorIndexConfig) -> DbResult<Self> {
        debug!("Opening SimpleVectorIndex at {:?}", config.path);

        let index = Self {
            path: Some(config.path.clone()),
            dimension: config.dimension,
            metric: config.metric,
            collections: RwLock::new(BTreeMap::new()),
        };

        let data_path = config.path.join(DATA_FILENAME);
        if data_path.exists() {
            index.load_from_file(&data_path)?;
        }

        Ok(index)
    }

    /// Create an index that lives only in memory.
    pub fn in_memory(dimension: usize, metric: VectorMetric) -> Self {
        Self {
            path: None,
            dimension,
            metric,
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> DbResult<RwLockReadGuard<'_, Collections>> {
        self.collections
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> DbResult<RwLockWriteGuard<'_, Collections>> {
        self.collections
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))
    }

    fn load_from_file(&self, path: &Path) -> DbResult<()> {
        debug!("Loading vectors from {:?}", path);

        let file = File::open(path).map_err(|e| DbError::vector_io(path, e.to_string()))?;
        let reader = BufReader::new(file);
        let mut collections = self.write()?;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<VectorInsert>(&line) {
                Ok(stored) if stored.vector.len() == self.dimension => {
                    collections
                        .entry(stored.knowledge_base_id.clone())
                        .or_default()
                        .insert(stored.passage_id.clone(), stored);
                }
                Ok(stored) => {
                    debug!(
                        "Skipping line {}: passage '{}' has dimension {}",
                        line_num + 1,
                        stored.passage_id,
                        stored.vector.len()
                    );
                }
                Err(e) => {
                    debug!("Skipping invalid line {}: {}", line_num + 1, e);
                }
            }
        }

        let total: usize = collections.values().map(HashMap::len).sum();
        debug!(
            "Loaded {} vectors in {} collections",
            total,
            collections.len()
        );
        Ok(())
    }

    /// Persist all collections. No-op for in-memory indexes.
    fn save_to_file(&self) -> DbResult<()> {
        let Some(dir) = self.path.as_ref() else {
            return Ok(());
        };
        let data_path = dir.join(DATA_FILENAME);
        debug!("Saving vectors to {:?}", data_path);

        std::fs::create_dir_all(dir)?;
        let collections = self.read()?;

        let file =
            File::create(&data_path).map_err(|e| DbError::vector_io(&data_path, e.to_string()))?;
        let mut writer = BufWriter::new(file);
        let mut count = 0;
        for collection in collections.values() {
            let mut passages: Vec<&VectorInsert> = collection.values().collect();
            passages.sort_by(|a, b| a.passage_id.cmp(&b.passage_id));
            for stored in passages {
                serde_json::to_writer(&mut writer, stored)?;
                writeln!(writer)?;
                count += 1;
            }
        }
        writer.flush()?;

        let knowledge_bases: Vec<String> = collections.keys().cloned().collect();
        drop(collections);

        let mut meta = load_index_meta(dir)
            .unwrap_or_else(|_| VectorIndexMeta::new("simple", self.dimension, self.metric));
        meta.update_contents(count, knowledge_bases);
        write_index_meta(dir, &meta)?;

        debug!("Saved {} vectors", count);
        Ok(())
    }

    fn compute_similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            VectorMetric::Cosine => cosine_similarity(a, b),
            VectorMetric::Dot => dot_product(a, b),
            VectorMetric::L2 => 1.0 / (1.0 + euclidean_distance(a, b)),
        }
    }
}

impl VectorIndexBackend for SimpleVectorIndex {
    fn query(
        &self,
        knowledge_base_id: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>> {
        trace!(
            "Querying collection '{}', limit={}",
            knowledge_base_id,
            limit
        );

        if embedding.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        let collections = self.read()?;
        let Some(collection) = collections.get(knowledge_base_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &VectorInsert)> = collection
            .values()
            .filter(|v| {
                filter
                    .map(|f| f.matches(&v.knowledge_id, &v.passage_id))
                    .unwrap_or(true)
            })
            .map(|v| (self.compute_similarity(embedding, &v.vector), v))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.passage_id.cmp(&b.1.passage_id))
        });

        let results: Vec<VectorSearchResult> = scored
            .into_iter()
            .take(limit)
            .map(|(score, stored)| VectorSearchResult::from_insert(stored, score))
            .collect();

        trace!("Found {} results", results.len());
        Ok(results)
    }

    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()> {
        debug!("Upserting {} vectors", vectors.len());

        let mut collections = self.write()?;
        for insert in vectors {
            if insert.vector.len() != self.dimension {
                return Err(DbError::DimensionMismatch {
                    expected: self.dimension,
                    actual: insert.vector.len(),
                });
            }
            if insert.knowledge_base_id.trim().is_empty() {
                return Err(DbError::MissingKnowledgeBase {
                    passage_id: insert.passage_id.clone(),
                });
            }
            collections
                .entry(insert.knowledge_base_id.clone())
                .or_default()
                .insert(insert.passage_id.clone(), insert.clone());
        }

        drop(collections);
        self.save_to_file()
    }

    fn delete(&self, knowledge_base_id: &str, passage_ids: &[String]) -> DbResult<()> {
        debug!(
            "Deleting {} vectors from '{}'",
            passage_ids.len(),
            knowledge_base_id
        );

        let mut collections = self.write()?;
        if let Some(collection) = collections.get_mut(knowledge_base_id) {
            for id in passage_ids {
                collection.remove(id);
            }
            if collection.is_empty() {
                collections.remove(knowledge_base_id);
            }
        }

        drop(collections);
        self.save_to_file()
    }

    fn chunk_at(
        &self,
        knowledge_base_id: &str,
        knowledge_id: &str,
        chunk_index: u32,
    ) -> DbResult<Option<VectorSearchResult>> {
        let collections = self.read()?;
        let found = collections.get(knowledge_base_id).and_then(|collection| {
            collection
                .values()
                .filter(|v| v.knowledge_id == knowledge_id && v.chunk_index == Some(chunk_index))
                .min_by(|a, b| a.passage_id.cmp(&b.passage_id))
                .map(|v| VectorSearchResult::from_insert(v, 0.0))
        });
        Ok(found)
    }

    fn knowledge_bases(&self) -> DbResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn flush(&self) -> DbResult<()> {
        self.save_to_file()
    }

    fn len(&self) -> DbResult<usize> {
        Ok(self.read()?.values().map(HashMap::len).sum())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> VectorMetric {
        self.metric
    }
}

// ============================================================================
// Similarity Functions
// ============================================================================

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
