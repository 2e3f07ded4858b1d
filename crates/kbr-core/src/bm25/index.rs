//! BM25 inverted index for one knowledge base.
//!
//! The index is built in one pass and never modified afterwards; updates
//! build a replacement. Readers can therefore share it behind an `Arc`
//! without any locking.

use std::collections::{BTreeMap, HashMap, HashSet};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::scorer::{idf, Bm25Params};
use super::tokenizer::{Tokenizer, TokenizerConfig};
use super::Bm25Config;

/// A passage handed to the keyword store for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordPassage {
    pub passage_id: String,
    pub knowledge_id: String,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    pub content: String,
}

impl KeywordPassage {
    pub fn new(
        passage_id: impl Into<String>,
        knowledge_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            passage_id: passage_id.into(),
            knowledge_id: knowledge_id.into(),
            chunk_index: None,
            content: content.into(),
        }
    }

    pub fn with_chunk_index(mut self, chunk_index: u32) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }
}

/// A passage as stored in the index.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct IndexedPassage {
    pub passage_id: String,
    pub knowledge_id: String,
    pub chunk_index: Option<u32>,
    pub content: String,
    /// Token count after normalization.
    pub length: u32,
}

impl IndexedPassage {
    pub fn to_keyword_passage(&self) -> KeywordPassage {
        KeywordPassage {
            passage_id: self.passage_id.clone(),
            knowledge_id: self.knowledge_id.clone(),
            chunk_index: self.chunk_index,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Posting {
    passage: u32,
    term_freq: u32,
}

/// One scored passage.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Hit<'a> {
    pub passage: &'a IndexedPassage,
    pub score: f32,
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25IndexStats {
    pub num_passages: usize,
    pub vocabulary_size: usize,
    pub total_tokens: u64,
    pub avg_passage_length: f32,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Bm25Index {
    params: Bm25Params,
    tokenizer: TokenizerConfig,
    /// Term to postings; a term's document frequency is its posting count.
    postings: HashMap<String, Vec<Posting>>,
    /// Sorted by passage ID.
    passages: Vec<IndexedPassage>,
    /// (knowledge ID, chunk index) to position in `passages`.
    chunks: BTreeMap<(String, u32), u32>,
    avg_len: f32,
    total_tokens: u64,
}

impl Bm25Index {
    /// An index with no passages.
    pub fn empty(config: &Bm25Config) -> Self {
        Self::build(config, std::iter::empty())
    }

    /// Build an index. A repeated passage ID keeps its last occurrence.
    pub fn build<I>(config: &Bm25Config, passages: I) -> Self
    where
        I: IntoIterator<Item = KeywordPassage>,
    {
        let unique: BTreeMap<String, KeywordPassage> = passages
            .into_iter()
            .map(|p| (p.passage_id.clone(), p))
            .collect();

        let tokenizer_config = config.tokenizer_config();
        let tokenizer = Tokenizer::new(tokenizer_config.clone());

        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut stored = Vec::with_capacity(unique.len());
        let mut chunks = BTreeMap::new();
        let mut total_tokens = 0u64;

        for (position, passage) in unique.into_values().enumerate() {
            let position = position as u32;
            let (tf, length) = tokenizer.term_frequencies(&passage.content);
            total_tokens += length as u64;

            for (term, term_freq) in tf {
                postings.entry(term).or_default().push(Posting {
                    passage: position,
                    term_freq,
                });
            }
            if let Some(chunk) = passage.chunk_index {
                // Passages arrive sorted, so the lowest ID wins a collision
                chunks
                    .entry((passage.knowledge_id.clone(), chunk))
                    .or_insert(position);
            }
            stored.push(IndexedPassage {
                passage_id: passage.passage_id,
                knowledge_id: passage.knowledge_id,
                chunk_index: passage.chunk_index,
                content: passage.content,
                length: length as u32,
            });
        }

        let avg_len = if stored.is_empty() {
            0.0
        } else {
            total_tokens as f32 / stored.len() as f32
        };

        Self {
            params: config.params(),
            tokenizer: tokenizer_config,
            postings,
            passages: stored,
            chunks,
            avg_len,
            total_tokens,
        }
    }

    /// Score passages against a query.
    ///
    /// Only passages whose knowledge ID is in `knowledge_ids` are considered
    /// when it is non-empty. Results are sorted by score descending, ties by
    /// passage ID, and contain at most `top_k` entries, all with a positive
    /// score.
    pub fn search(&self, query: &str, top_k: usize, knowledge_ids: &[String]) -> Vec<Bm25Hit<'_>> {
        if self.passages.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut terms = Tokenizer::new(self.tokenizer.clone()).tokenize(query);
        terms.sort();
        terms.dedup();

        let allowed: Option<HashSet<&str>> = (!knowledge_ids.is_empty())
            .then(|| knowledge_ids.iter().map(String::as_str).collect());

        let num_passages = self.passages.len();
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let weight = idf(num_passages, list.len());
            for posting in list {
                let passage = &self.passages[posting.passage as usize];
                if let Some(allowed) = &allowed {
                    if !allowed.contains(passage.knowledge_id.as_str()) {
                        continue;
                    }
                }
                *scores.entry(posting.passage).or_insert(0.0) += self.params.term_score(
                    posting.term_freq,
                    passage.length as usize,
                    self.avg_len,
                    weight,
                );
            }
        }

        // Positions follow passage ID order, so they break ties the same way
        let mut ranked: Vec<(u32, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(position, score)| Bm25Hit {
                passage: &self.passages[position as usize],
                score,
            })
            .collect()
    }

    /// The passage holding a chunk of a document, if indexed.
    pub fn chunk_at(&self, knowledge_id: &str, chunk_index: u32) -> Option<&IndexedPassage> {
        self.chunks
            .get(&(knowledge_id.to_string(), chunk_index))
            .map(|&position| &self.passages[position as usize])
    }

    pub fn passages(&self) -> impl Iterator<Item = &IndexedPassage> {
        self.passages.iter()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Document frequency of an already normalized term.
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map(Vec::len).unwrap_or(0)
    }

    pub fn stats(&self) -> Bm25IndexStats {
        Bm25IndexStats {
            num_passages: self.passages.len(),
            vocabulary_size: self.postings.len(),
            total_tokens: self.total_tokens,
            avg_passage_length: self.avg_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Bm25Index {
        Bm25Index::build(
            &Bm25Config::default(),
            vec![
                KeywordPassage::new("p1", "doc-a", "Vacation requests need manager approval")
                    .with_chunk_index(0),
                KeywordPassage::new("p2", "doc-a", "Unused vacation days roll over each year")
                    .with_chunk_index(1),
                KeywordPassage::new("p3", "doc-b", "Expense reports are due monthly"),
                KeywordPassage::new("p4", "doc-c", "Security badges must be worn on site"),
            ],
        )
    }

    #[test]
    fn test_build_stats() {
        let index = sample_index();
        let stats = index.stats();
        assert_eq!(stats.num_passages, 4);
        assert!(stats.vocabulary_size > 10);
        assert!(stats.avg_passage_length > 0.0);
        let term = Tokenizer::default().tokenize("vacation").remove(0);
        assert_eq!(index.doc_freq(&term), 2);
    }

    #[test]
    fn test_search_ranks_matching_passages() {
        let index = sample_index();
        let hits = index.search("vacation approval", 10, &[]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].passage.passage_id, "p1");
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_search_respects_top_k_and_filter() {
        let index = sample_index();
        assert_eq!(index.search("vacation", 1, &[]).len(), 1);
        assert!(index.search("vacation", 0, &[]).is_empty());

        let hits = index.search("vacation expense", 10, &["doc-b".to_string()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.passage_id, "p3");
    }

    #[test]
    fn test_search_no_match_is_empty() {
        let index = sample_index();
        assert!(index.search("kubernetes", 10, &[]).is_empty());
        assert!(index.search("the and of", 10, &[]).is_empty());
        assert!(Bm25Index::empty(&Bm25Config::default())
            .search("vacation", 10, &[])
            .is_empty());
    }

    #[test]
    fn test_ties_break_by_passage_id() {
        let index = Bm25Index::build(
            &Bm25Config::default(),
            vec![
                KeywordPassage::new("z", "d", "identical text"),
                KeywordPassage::new("a", "d", "identical text"),
            ],
        );
        let hits = index.search("identical", 10, &[]);
        let ids: Vec<_> = hits.iter().map(|h| h.passage.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_duplicate_passage_keeps_last() {
        let index = Bm25Index::build(
            &Bm25Config::default(),
            vec![
                KeywordPassage::new("p", "d", "old content"),
                KeywordPassage::new("p", "d", "fresh content"),
            ],
        );
        assert_eq!(index.len(), 1);
        assert!(index.search("old", 10, &[]).is_empty());
        assert_eq!(index.search("fresh", 10, &[]).len(), 1);
    }

    #[test]
    fn test_chunk_lookup() {
        let index = sample_index();
        assert_eq!(index.chunk_at("doc-a", 1).unwrap().passage_id, "p2");
        assert!(index.chunk_at("doc-a", 2).is_none());
        assert!(index.chunk_at("doc-b", 0).is_none());
    }
}
