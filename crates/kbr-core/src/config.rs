//! Configuration types for KBR.
//!
//! - [`KbrConfig`]: process configuration stored in `~/.kbr/config.yaml`
//! - [`RetrievalConfig`]: thresholds, result caps, time budgets
//! - [`RerankConfig`] / [`MergeConfig`]: per-stage knobs
//! - [`KnowledgeBaseConfig`]: per-knowledge-base overrides
//! - [`SharedConfig`]: atomically swappable snapshot holder
//!
//! The pipeline never reads configuration field-by-field from a mutable
//! source: each run captures one `Arc<KbrConfig>` and uses it to the end.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use kbr_model::{EmbeddingConfig, RerankerConfig};

use crate::errors::{KbrError, KbrResult};
use crate::types::Modality;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "KBR_CONFIG";

// ======================================================================
// Defaults
// ======================================================================

const DEFAULT_VECTOR_THRESHOLD: f32 = 0.5;
const DEFAULT_KEYWORD_THRESHOLD: f32 = 0.0;
const DEFAULT_PER_TARGET_TOP_K: usize = 50;
const DEFAULT_FINAL_TOP_K: usize = 10;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CONCURRENT_BACKEND_CALLS: usize = 16;

const DEFAULT_RERANK_MAX_BATCH_SIZE: usize = 32;
const DEFAULT_RERANK_MAX_BATCHES: usize = 4;
const DEFAULT_RERANK_MIN_RESULTS: usize = 1;

const DEFAULT_NEIGHBOR_WINDOW: u32 = 1;
const DEFAULT_NEIGHBOR_SCORE_FACTOR: f32 = 0.8;

// ============================================================================
// KbrConfig
// ============================================================================

/// Process-level configuration.
///
/// # Example YAML
///
/// ```yaml
/// retrieval:
///   vectorThreshold: 0.5
///   keywordThreshold: 0.3
///   finalTopK: 5
///   rerank:
///     maxBatchSize: 32
///     overflow: partition
/// knowledgeBases:
///   handbook:
///     modalities: [vector, keyword]
///     vectorThreshold: 0.6
/// reranker:
///   endpoint: http://localhost:8081/v1
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbrConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Known knowledge bases and their overrides.
    #[serde(default)]
    pub knowledge_bases: BTreeMap<String, KnowledgeBaseConfig>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub reranker: RerankerConfig,
}

impl KbrConfig {
    /// Load from `$KBR_CONFIG` or `~/.kbr/config.yaml`.
    ///
    /// A missing file yields defaults.
    pub fn load_default() -> KbrResult<Self> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a config file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KbrError::InvalidConfigFile`] if the file cannot be read or
    /// parsed, [`KbrError::InvalidConfiguration`] if validation fails.
    pub fn from_path(path: &Path) -> KbrResult<Self> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            KbrError::InvalidConfigFile(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content).map_err(|e| match e {
            KbrError::InvalidConfigFile(msg) => {
                KbrError::InvalidConfigFile(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(content: &str) -> KbrResult<Self> {
        Self::parse(content)
    }

    fn parse(content: &str) -> KbrResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| KbrError::InvalidConfigFile(format!("Failed to parse: {}", e)))?;

        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }
        Ok(config)
    }

    /// Default config file path: `$KBR_CONFIG` if set, else `~/.kbr/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::home_dir().map(|h| h.join(".kbr").join("config.yaml"))
    }

    /// Validate the configuration.
    ///
    /// Returns warnings for suspicious but workable values.
    ///
    /// # Errors
    ///
    /// Returns [`KbrError::InvalidConfiguration`] for values the pipeline
    /// cannot run with.
    pub fn validate(&self) -> KbrResult<Vec<String>> {
        let mut warnings = self.retrieval.validate()?;

        for (id, kb) in &self.knowledge_bases {
            warnings.extend(kb.validate(id)?);
        }

        let kb_count = self.knowledge_bases.len().max(1);
        if self.retrieval.final_top_k > self.retrieval.per_target_top_k.saturating_mul(kb_count) {
            warnings.push(format!(
                "retrieval.finalTopK={} exceeds perTargetTopK={} x {} knowledge base(s); results will never fill",
                self.retrieval.final_top_k, self.retrieval.per_target_top_k, kb_count
            ));
        }

        if self.retrieval.rerank.enabled
            && self.reranker.max_batch_size < self.retrieval.rerank.max_batch_size
        {
            warnings.push(format!(
                "retrieval.rerank.maxBatchSize={} is above reranker.maxBatchSize={}; the smaller limit applies",
                self.retrieval.rerank.max_batch_size, self.reranker.max_batch_size
            ));
        }

        Ok(warnings)
    }
}

// ======================================================================
// RetrievalConfig
// ======================================================================

/// Pipeline-wide retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Minimum vector similarity kept (inclusive).
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,

    /// Minimum keyword relevance kept (inclusive).
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f32,

    /// Candidates requested per modality per knowledge base.
    #[serde(default = "default_per_target_top_k")]
    pub per_target_top_k: usize,

    /// Results returned to the caller.
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    /// Whole-request budget applied when the caller gives no deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Budget for a single backend call.
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Process-wide cap on in-flight backend calls.
    #[serde(default = "default_max_concurrent_backend_calls")]
    pub max_concurrent_backend_calls: usize,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub merge: MergeConfig,
}

fn default_vector_threshold() -> f32 {
    DEFAULT_VECTOR_THRESHOLD
}

fn default_keyword_threshold() -> f32 {
    DEFAULT_KEYWORD_THRESHOLD
}

fn default_per_target_top_k() -> usize {
    DEFAULT_PER_TARGET_TOP_K
}

fn default_final_top_k() -> usize {
    DEFAULT_FINAL_TOP_K
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_backend_timeout_ms() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_MS
}

fn default_max_concurrent_backend_calls() -> usize {
    DEFAULT_MAX_CONCURRENT_BACKEND_CALLS
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_threshold: DEFAULT_VECTOR_THRESHOLD,
            keyword_threshold: DEFAULT_KEYWORD_THRESHOLD,
            per_target_top_k: DEFAULT_PER_TARGET_TOP_K,
            final_top_k: DEFAULT_FINAL_TOP_K,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            backend_timeout_ms: DEFAULT_BACKEND_TIMEOUT_MS,
            max_concurrent_backend_calls: DEFAULT_MAX_CONCURRENT_BACKEND_CALLS,
            rerank: RerankConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn with_final_top_k(mut self, final_top_k: usize) -> Self {
        self.final_top_k = final_top_k;
        self
    }

    pub fn with_per_target_top_k(mut self, per_target_top_k: usize) -> Self {
        self.per_target_top_k = per_target_top_k;
        self
    }

    pub fn with_thresholds(mut self, vector: f32, keyword: f32) -> Self {
        self.vector_threshold = vector;
        self.keyword_threshold = keyword;
        self
    }

    pub fn with_backend_timeout_ms(mut self, ms: u64) -> Self {
        self.backend_timeout_ms = ms;
        self
    }

    pub fn with_rerank(mut self, rerank: RerankConfig) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Threshold for a modality before per-knowledge-base overrides.
    pub fn threshold_for(&self, modality: Modality) -> f32 {
        match modality {
            Modality::Vector => self.vector_threshold,
            Modality::Keyword => self.keyword_threshold,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn validate(&self) -> KbrResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.final_top_k == 0 {
            return Err(KbrError::invalid_config(
                "retrieval.finalTopK cannot be 0",
                "Set finalTopK to at least 1",
            ));
        }
        if self.per_target_top_k == 0 {
            return Err(KbrError::invalid_config(
                "retrieval.perTargetTopK cannot be 0",
                "Set perTargetTopK to at least 1 (recommended: 20-100)",
            ));
        }
        if self.max_concurrent_backend_calls == 0 {
            return Err(KbrError::invalid_config(
                "retrieval.maxConcurrentBackendCalls cannot be 0",
                "Set maxConcurrentBackendCalls to at least 1",
            ));
        }
        if self.backend_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(KbrError::invalid_config(
                "retrieval timeouts cannot be 0",
                "Set requestTimeoutMs and backendTimeoutMs to positive values",
            ));
        }
        check_threshold("retrieval.vectorThreshold", self.vector_threshold)?;
        check_threshold("retrieval.keywordThreshold", self.keyword_threshold)?;

        if self.backend_timeout_ms > self.request_timeout_ms {
            warnings.push(format!(
                "retrieval.backendTimeoutMs={} exceeds requestTimeoutMs={}; the request deadline will cut backend calls short",
                self.backend_timeout_ms, self.request_timeout_ms
            ));
        }

        warnings.extend(self.rerank.validate()?);
        warnings.extend(self.merge.validate()?);
        Ok(warnings)
    }
}

/// Reject negative, NaN or infinite thresholds.
fn check_threshold(field: &str, value: f32) -> KbrResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(KbrError::invalid_config(
            format!("{} must be a finite non-negative number, got {}", field, value),
            "Scores are non-negative; use 0 to keep every candidate",
        ));
    }
    Ok(())
}

// ======================================================================
// RerankConfig
// ======================================================================

/// What to do with candidates that do not fit in one rerank batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankOverflow {
    /// Send the best `maxBatchSize` candidates, drop the rest.
    #[default]
    Truncate,
    /// Send up to `maxBatches` batches of at most `maxBatchSize` each.
    Partition,
}

/// Rerank stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum rerank score kept (inclusive).
    #[serde(default)]
    pub threshold: f32,

    /// Relaxed threshold for the single retry when too few survive.
    #[serde(default)]
    pub degraded_threshold: Option<f32>,

    /// Survivors below this count trigger the degrade retry.
    #[serde(default = "default_min_results")]
    pub min_results: usize,

    /// Passages per rerank call. Tightened by the service's own limit.
    #[serde(default = "default_rerank_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default)]
    pub overflow: RerankOverflow,

    /// Batch cap for [`RerankOverflow::Partition`].
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,

    /// Interleave modalities when choosing what fits in the batch.
    #[serde(default)]
    pub preserve_modality_diversity: bool,
}

fn default_true() -> bool {
    true
}

fn default_min_results() -> usize {
    DEFAULT_RERANK_MIN_RESULTS
}

fn default_rerank_max_batch_size() -> usize {
    DEFAULT_RERANK_MAX_BATCH_SIZE
}

fn default_max_batches() -> usize {
    DEFAULT_RERANK_MAX_BATCHES
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.0,
            degraded_threshold: None,
            min_results: DEFAULT_RERANK_MIN_RESULTS,
            max_batch_size: DEFAULT_RERANK_MAX_BATCH_SIZE,
            overflow: RerankOverflow::default(),
            max_batches: DEFAULT_RERANK_MAX_BATCHES,
            preserve_modality_diversity: false,
        }
    }
}

impl RerankConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_degraded_threshold(mut self, degraded: f32) -> Self {
        self.degraded_threshold = Some(degraded);
        self
    }

    pub fn with_min_results(mut self, min_results: usize) -> Self {
        self.min_results = min_results;
        self
    }

    pub fn with_overflow(mut self, overflow: RerankOverflow, max_batches: usize) -> Self {
        self.overflow = overflow;
        self.max_batches = max_batches;
        self
    }

    pub fn with_modality_diversity(mut self, enabled: bool) -> Self {
        self.preserve_modality_diversity = enabled;
        self
    }

    pub fn validate(&self) -> KbrResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_batch_size == 0 {
            return Err(KbrError::invalid_config(
                "retrieval.rerank.maxBatchSize cannot be 0",
                "Set maxBatchSize to the rerank service's documented limit",
            ));
        }
        if self.overflow == RerankOverflow::Partition && self.max_batches == 0 {
            return Err(KbrError::invalid_config(
                "retrieval.rerank.maxBatches cannot be 0 with overflow: partition",
                "Set maxBatches to at least 1",
            ));
        }
        check_threshold("retrieval.rerank.threshold", self.threshold)?;

        if let Some(degraded) = self.degraded_threshold {
            check_threshold("retrieval.rerank.degradedThreshold", degraded)?;
            if degraded >= self.threshold {
                warnings.push(format!(
                    "retrieval.rerank.degradedThreshold={} is not below threshold={}; the degrade retry cannot recover anything",
                    degraded, self.threshold
                ));
            }
        }

        if self.overflow == RerankOverflow::Partition && self.max_batches > 16 {
            warnings.push(format!(
                "retrieval.rerank.maxBatches={} is very large; rerank latency grows with every batch",
                self.max_batches
            ));
        }

        Ok(warnings)
    }
}

// ======================================================================
// MergeConfig
// ======================================================================

/// Merge stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    /// Combine consecutive chunks of the same document.
    #[serde(default)]
    pub merge_adjacent: bool,

    /// Pull in chunks adjacent to each candidate.
    #[serde(default)]
    pub neighbor_expansion: bool,

    /// Chunks on each side fetched by neighbor expansion.
    #[serde(default = "default_neighbor_window")]
    pub neighbor_window: u32,

    /// Neighbor score as a fraction of the parent's effective score.
    #[serde(default = "default_neighbor_score_factor")]
    pub neighbor_score_factor: f32,

    /// Emit neighbor-expansion hits as separate items even when the
    /// passage also matched directly.
    #[serde(default)]
    pub keep_neighbor_duplicates: bool,

    #[serde(default = "default_adjacent_separator")]
    pub adjacent_separator: String,
}

fn default_neighbor_window() -> u32 {
    DEFAULT_NEIGHBOR_WINDOW
}

fn default_neighbor_score_factor() -> f32 {
    DEFAULT_NEIGHBOR_SCORE_FACTOR
}

fn default_adjacent_separator() -> String {
    "\n".to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merge_adjacent: false,
            neighbor_expansion: false,
            neighbor_window: DEFAULT_NEIGHBOR_WINDOW,
            neighbor_score_factor: DEFAULT_NEIGHBOR_SCORE_FACTOR,
            keep_neighbor_duplicates: false,
            adjacent_separator: default_adjacent_separator(),
        }
    }
}

impl MergeConfig {
    pub fn with_merge_adjacent(mut self, enabled: bool) -> Self {
        self.merge_adjacent = enabled;
        self
    }

    pub fn with_neighbor_expansion(mut self, window: u32, score_factor: f32) -> Self {
        self.neighbor_expansion = true;
        self.neighbor_window = window;
        self.neighbor_score_factor = score_factor;
        self
    }

    pub fn with_keep_neighbor_duplicates(mut self, keep: bool) -> Self {
        self.keep_neighbor_duplicates = keep;
        self
    }

    pub fn validate(&self) -> KbrResult<Vec<String>> {
        let mut warnings = Vec::new();

        check_threshold(
            "retrieval.merge.neighborScoreFactor",
            self.neighbor_score_factor,
        )?;
        if self.neighbor_expansion && self.neighbor_window == 0 {
            warnings.push(
                "retrieval.merge.neighborWindow=0 disables neighbor expansion".to_string(),
            );
        }
        if self.neighbor_score_factor > 1.0 {
            warnings.push(format!(
                "retrieval.merge.neighborScoreFactor={} is above 1; neighbors will outrank the passages that matched",
                self.neighbor_score_factor
            ));
        }

        Ok(warnings)
    }
}

// ======================================================================
// KnowledgeBaseConfig
// ======================================================================

/// Per-knowledge-base configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    /// Modalities searched for this knowledge base.
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_threshold: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_threshold: Option<f32>,

    /// Per-knowledge-base result cap, overriding `perTargetTopK`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

fn default_modalities() -> Vec<Modality> {
    Modality::ALL.to_vec()
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            modalities: default_modalities(),
            vector_threshold: None,
            keyword_threshold: None,
            top_k: None,
        }
    }
}

impl KnowledgeBaseConfig {
    pub fn with_modalities(mut self, modalities: impl IntoIterator<Item = Modality>) -> Self {
        self.modalities = modalities.into_iter().collect();
        self
    }

    pub fn with_vector_threshold(mut self, threshold: f32) -> Self {
        self.vector_threshold = Some(threshold);
        self
    }

    pub fn with_keyword_threshold(mut self, threshold: f32) -> Self {
        self.keyword_threshold = Some(threshold);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn validate(&self, id: &str) -> KbrResult<Vec<String>> {
        let mut warnings = Vec::new();

        if id.trim().is_empty() {
            return Err(KbrError::invalid_config(
                "knowledgeBases contains an empty ID",
                "Remove the entry or give it a name",
            ));
        }
        if self.modalities.is_empty() {
            return Err(KbrError::invalid_config(
                format!("knowledgeBases.{}.modalities is empty", id),
                "List at least one of: vector, keyword",
            ));
        }
        if let Some(t) = self.vector_threshold {
            check_threshold(&format!("knowledgeBases.{}.vectorThreshold", id), t)?;
        }
        if let Some(t) = self.keyword_threshold {
            check_threshold(&format!("knowledgeBases.{}.keywordThreshold", id), t)?;
        }
        if self.top_k == Some(0) {
            return Err(KbrError::invalid_config(
                format!("knowledgeBases.{}.topK cannot be 0", id),
                "Set topK to at least 1 or remove it",
            ));
        }

        let mut seen = self.modalities.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.modalities.len() {
            warnings.push(format!(
                "knowledgeBases.{}.modalities lists a modality twice",
                id
            ));
        }

        Ok(warnings)
    }
}

// ======================================================================
// SharedConfig
// ======================================================================

/// Holder for the current configuration snapshot.
///
/// Readers take an `Arc` and keep it for the whole request. Reloads parse and
/// validate first, then swap the pointer, so a reader sees either the old
/// snapshot or the new one.
#[derive(Debug)]
pub struct SharedConfig {
    current: RwLock<Arc<KbrConfig>>,
}

impl SharedConfig {
    /// Wrap a configuration after validating it.
    pub fn new(config: KbrConfig) -> KbrResult<Self> {
        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> KbrResult<Arc<KbrConfig>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| KbrError::Other(anyhow::anyhow!("config lock poisoned")))
    }

    /// Validate and install a new configuration. Returns its warnings.
    pub fn replace(&self, config: KbrConfig) -> KbrResult<Vec<String>> {
        let warnings = config.validate()?;
        let next = Arc::new(config);
        let mut guard = self
            .current
            .write()
            .map_err(|_| KbrError::Other(anyhow::anyhow!("config lock poisoned")))?;
        *guard = next;
        Ok(warnings)
    }

    /// Re-read a config file and swap it in. File I/O happens before the
    /// lock is taken; on error the previous snapshot stays active.
    pub fn reload_from(&self, path: &Path) -> KbrResult<()> {
        let config = KbrConfig::from_path(path)?;
        self.replace(config)?;
        tracing::info!("Reloaded configuration from {}", path.display());
        Ok(())
    }
}

impl From<Arc<KbrConfig>> for SharedConfig {
    fn from(config: Arc<KbrConfig>) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }
}
