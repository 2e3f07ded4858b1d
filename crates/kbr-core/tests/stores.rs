//! Pipeline runs over the real keyword store and vector index.

mod common;

use std::sync::Arc;

use common::{builder, config, ids};
use kbr_core::{
    Bm25Config, EmbeddingBackend, KbrResult, KeywordPassage, KeywordRetriever, KeywordStore,
    MatchType, MergeConfig, QueryRequest, RequestScope, VectorIndexNeighbors, VectorRetriever,
};
use kbr_db::vector::{SimpleVectorIndex, VectorIndexBackend, VectorInsert, VectorMetric};
use tempfile::TempDir;

/// Two-axis embedder: texts mentioning vacation point one way, the rest the
/// other.
struct TopicEmbedder;

impl EmbeddingBackend for TopicEmbedder {
    fn model_id(&self) -> &str {
        "topic"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn embed_batch(&self, inputs: &[String]) -> KbrResult<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|t| {
                if t.to_lowercase().contains("vacation") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }
}

const LEAVE: [&str; 4] = [
    "Employees accrue leave monthly",
    "Vacation requests need manager approval",
    "Approved requests appear in the team calendar",
    "Parking permits renew every spring",
];

fn keyword_passages() -> Vec<KeywordPassage> {
    let mut passages: Vec<KeywordPassage> = LEAVE
        .iter()
        .enumerate()
        .map(|(i, text)| {
            KeywordPassage::new(format!("leave-{}", i), "leave", *text)
                .with_chunk_index(i as u32)
        })
        .collect();
    passages.push(KeywordPassage::new("it-0", "it", "VPN setup guide").with_chunk_index(0));
    passages
}

fn vector_index() -> Arc<SimpleVectorIndex> {
    let index = SimpleVectorIndex::in_memory(2, VectorMetric::Cosine);
    let embedder = TopicEmbedder;
    let inserts: Vec<VectorInsert> = keyword_passages()
        .into_iter()
        .map(|p| {
            let embedding = embedder.embed(&p.content).unwrap();
            VectorInsert::new("handbook", p.passage_id, embedding)
                .with_knowledge_id(p.knowledge_id)
                .with_chunk_index(p.chunk_index.unwrap_or(0))
                .with_content(p.content)
        })
        .collect();
    index.upsert(&inserts).unwrap();
    Arc::new(index)
}

#[tokio::test]
async fn test_hybrid_search_with_neighbors_and_adjacency() {
    let store = Arc::new(KeywordStore::new(Bm25Config::default()));
    store.index_passages("handbook", keyword_passages()).unwrap();
    let index = vector_index();

    let mut cfg = config(&["handbook"]);
    cfg.retrieval.vector_threshold = 0.5;
    cfg.retrieval.merge = MergeConfig::default()
        .with_neighbor_expansion(1, 0.5)
        .with_merge_adjacent(true);

    let pipeline = builder(cfg)
        .with_retriever(Arc::new(VectorRetriever::new(
            Arc::new(TopicEmbedder),
            index.clone(),
        )))
        .with_retriever(Arc::new(KeywordRetriever::new(store)))
        .with_neighbor_source(Arc::new(VectorIndexNeighbors::new(index)))
        .build()
        .unwrap();

    let out = pipeline
        .run(QueryRequest::new("vacation", ["handbook"]), RequestScope::new())
        .await
        .unwrap();

    assert_eq!(ids(&out), vec!["handbook/leave-0"]);
    let item = &out.results[0];
    assert_eq!(item.content, LEAVE[..3].join("\n"));
    assert_eq!(
        item.match_types,
        vec![MatchType::Vector, MatchType::Keyword, MatchType::NeighborExpansion]
    );
    assert!(item.match_type.is_direct());

    let merge = &out.diagnostics.merge;
    assert_eq!(merge.neighbors_added, 2);
    assert_eq!(merge.adjacent_merged, 2);
    assert_eq!(merge.duplicates_collapsed, 1);
}

#[tokio::test]
async fn test_document_restriction_applies_to_both_modalities() {
    let store = Arc::new(KeywordStore::new(Bm25Config::default()));
    store.index_passages("handbook", keyword_passages()).unwrap();

    let pipeline = builder(config(&["handbook"]))
        .with_retriever(Arc::new(VectorRetriever::new(
            Arc::new(TopicEmbedder),
            vector_index(),
        )))
        .with_retriever(Arc::new(KeywordRetriever::new(store)))
        .build()
        .unwrap();

    let request = QueryRequest::new("vpn setup", ["handbook"]).with_knowledge_ids(["it"]);
    let out = pipeline.run(request, RequestScope::new()).await.unwrap();

    assert!(!out.results.is_empty());
    assert!(out.results.iter().all(|r| r.knowledge_id == "it"));
}

#[tokio::test]
async fn test_persisted_keyword_store_serves_queries() {
    let dir = TempDir::new().unwrap();
    {
        let store = KeywordStore::open(dir.path(), Bm25Config::default()).unwrap();
        store.index_passages("handbook", keyword_passages()).unwrap();
    }

    let store = Arc::new(KeywordStore::open(dir.path(), Bm25Config::default()).unwrap());
    let mut cfg = config(&[]);
    cfg.knowledge_bases.insert(
        "handbook".to_string(),
        kbr_core::KnowledgeBaseConfig::default().with_modalities([kbr_core::Modality::Keyword]),
    );
    let pipeline = builder(cfg)
        .with_retriever(Arc::new(KeywordRetriever::new(store)))
        .build()
        .unwrap();

    let out = pipeline
        .run(QueryRequest::new("parking permits", ["handbook"]), RequestScope::new())
        .await
        .unwrap();
    assert_eq!(ids(&out), vec!["handbook/leave-3"]);
    assert_eq!(out.results[0].match_type, MatchType::Keyword);
}
