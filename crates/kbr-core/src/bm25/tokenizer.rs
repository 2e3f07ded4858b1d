//! Text normalization for BM25.
//!
//! A [`Tokenizer`] is a cheap value created per call. It holds no shared
//! state, so concurrent indexing and querying never contend on it.

use std::collections::HashMap;

use bincode::{Decode, Encode};
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Tokenizer settings. Stored in the index so queries are processed the same
/// way as the passages were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TokenizerConfig {
    pub stemming: bool,
    pub remove_stopwords: bool,
    pub min_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            stemming: true,
            remove_stopwords: true,
            min_token_length: 2,
        }
    }
}

/// English function words. Sorted for binary search.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "between", "both", "but", "by", "can", "could",
    "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from", "further",
    "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if",
    "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not",
    "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
];

/// Unicode-aware tokenizer with optional stemming.
pub struct Tokenizer {
    config: TokenizerConfig,
    stemmer: Option<Stemmer>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        let stemmer = config
            .stemming
            .then(|| Stemmer::create(Algorithm::English));
        Self { config, stemmer }
    }

    /// Split text into normalized terms.
    ///
    /// Words are lowercased; words without any letter or digit, stop words
    /// and short words are dropped; the rest are stemmed.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .filter_map(|word| self.normalize(word))
            .collect()
    }

    /// Term frequencies of a text.
    pub fn term_frequencies(&self, text: &str) -> (HashMap<String, u32>, usize) {
        let tokens = self.tokenize(text);
        let length = tokens.len();
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }
        (tf, length)
    }

    fn normalize(&self, word: &str) -> Option<String> {
        let lower = word.to_lowercase();

        if !lower.chars().any(char::is_alphanumeric) {
            return None;
        }
        if lower.chars().count() < self.config.min_token_length {
            return None;
        }
        if self.config.remove_stopwords && is_stopword(&lower) {
            return None;
        }

        let term = match &self.stemmer {
            Some(stemmer) => stemmer.stem(&lower).into_owned(),
            None => lower,
        };

        // Stems can fall under the minimum
        (term.chars().count() >= self.config.min_token_length).then_some(term)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}
