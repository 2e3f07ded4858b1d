//! BM25 keyword retrieval.
//!
//! The keyword modality of the retrieval pipeline. Each knowledge base gets
//! its own inverted index, so a query against one knowledge base never scans
//! another's postings.
//!
//! ## Key Components
//!
//! - [`tokenizer`]: Unicode word segmentation, stop words, English stemming
//! - [`scorer`]: Okapi BM25 term scoring
//! - [`index`]: immutable per-knowledge-base inverted index
//! - [`storage`]: bincode persistence, one directory per knowledge base
//! - [`store`]: [`KeywordStore`], the shared multi-knowledge-base store
//!
//! ## Usage
//!
//! ```ignore
//! use kbr_core::bm25::{Bm25Config, KeywordPassage, KeywordStore};
//!
//! let store = KeywordStore::new(Bm25Config::default());
//! store.index_passages("handbook", passages)?;
//! let hits = store.search("handbook", "vacation policy", 20, &[])?;
//! ```

mod index;
mod scorer;
mod storage;
mod store;
mod tokenizer;

pub use index::{Bm25Hit, Bm25Index, Bm25IndexStats, IndexedPassage, KeywordPassage};
pub use scorer::{idf, Bm25Params};
pub use storage::{load_bm25_index, save_bm25_index, Bm25IndexMeta, INDEX_FILENAME, META_FILENAME};
pub use store::KeywordStore;
pub use tokenizer::{Tokenizer, TokenizerConfig};

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// BM25 configuration: tokenization and scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25Config {
    /// Term frequency saturation. Default: 1.2
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// Length normalization, 0 (none) to 1 (full). Default: 0.75
    #[serde(default = "default_b")]
    pub b: f32,

    #[serde(default = "default_true")]
    pub stemming: bool,

    #[serde(default = "default_true")]
    pub remove_stopwords: bool,

    /// Shorter tokens are dropped. Default: 2
    #[serde(default = "default_min_token_length")]
    pub min_token_length: usize,
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}

fn default_true() -> bool {
    true
}

fn default_min_token_length() -> usize {
    2
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            stemming: true,
            remove_stopwords: true,
            min_token_length: default_min_token_length(),
        }
    }
}

impl Bm25Config {
    pub(crate) fn params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
        }
    }

    pub(crate) fn tokenizer_config(&self) -> TokenizerConfig {
        TokenizerConfig {
            stemming: self.stemming,
            remove_stopwords: self.remove_stopwords,
            min_token_length: self.min_token_length,
        }
    }

    /// Reject parameters that make scores meaningless.
    pub fn validate(&self) -> crate::KbrResult<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(crate::KbrError::invalid_config(
                format!("bm25.k1 must be a non-negative number, got {}", self.k1),
                "Use the default 1.2 unless you have tuned it",
            ));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(crate::KbrError::invalid_config(
                format!("bm25.b must be between 0 and 1, got {}", self.b),
                "Use the default 0.75",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Bm25Config::default();
        assert!((config.k1 - 1.2).abs() < 0.001);
        assert!((config.b - 0.75).abs() < 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_b() {
        let config = Bm25Config {
            b: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_camel_case() {
        let config: Bm25Config =
            serde_json::from_str(r#"{"removeStopwords": false, "minTokenLength": 3}"#).unwrap();
        assert!(!config.remove_stopwords);
        assert_eq!(config.min_token_length, 3);
        assert!(config.stemming);
    }
}
