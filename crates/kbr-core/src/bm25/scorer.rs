//! Okapi BM25 scoring.
//!
//! ```text
//! score(D, Q) = Σ idf(t) · tf(t, D) · (k1 + 1) / (tf(t, D) + k1 · (1 − b + b · |D| / avgdl))
//! idf(t)      = ln(1 + (N − df(t) + 0.5) / (df(t) + 0.5))
//! ```
//!
//! Both factors are non-negative, so every BM25 score is too.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    /// Contribution of one query term to one passage.
    #[inline]
    pub fn term_score(&self, term_freq: u32, passage_len: usize, avg_len: f32, idf: f32) -> f32 {
        if term_freq == 0 {
            return 0.0;
        }
        let tf = term_freq as f32;
        let norm = if avg_len > 0.0 {
            1.0 - self.b + self.b * passage_len as f32 / avg_len
        } else {
            1.0
        };
        idf * tf * (self.k1 + 1.0) / (tf + self.k1 * norm)
    }
}

/// Smoothed inverse document frequency; positive for every `df <= n`.
#[inline]
pub fn idf(num_passages: usize, doc_freq: usize) -> f32 {
    let n = num_passages as f32;
    let df = doc_freq as f32;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}
