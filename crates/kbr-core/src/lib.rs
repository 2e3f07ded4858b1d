//! # kbr-core
//!
//! **Knowledge Base Retrieval** – multi-knowledge-base hybrid search kernel.
//!
//! A query names one or more knowledge bases. Each is searched with every
//! configured modality (vector similarity, BM25 keyword relevance)
//! concurrently; the union is reranked by a batch-bounded rerank service,
//! merged per passage and cut to the final top K.
//!
//! ## Main Types
//!
//! - [`RetrievalPipeline`] – the orchestrator, built with
//!   [`RetrievalPipeline::builder`]
//! - [`CompositeRetrievalEngine`] – every modality for one knowledge base
//! - [`RequestScope`] – caller deadline and cancellation
//! - [`KbrError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`pipeline`] – stages, context, diagnostics
//! - [`retriever`] – vector and keyword adapters
//! - [`bm25`] – per-knowledge-base keyword store
//! - [`config`] – YAML configuration and the shared snapshot holder
//! - [`gate`] – in-flight cap and per-call timeout for backend calls
//! - [`db_adapter`] / [`model_adapter`] – bridges to `kbr-db` and `kbr-model`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kbr_core::{KbrConfig, KeywordRetriever, KeywordStore, QueryRequest, RequestScope, RetrievalPipeline};
//!
//! let store = Arc::new(KeywordStore::new(Default::default()));
//! let pipeline = RetrievalPipeline::builder()
//!     .with_config(KbrConfig::load_default()?)
//!     .with_retriever(Arc::new(KeywordRetriever::new(store)))
//!     .build()?;
//!
//! let output = pipeline
//!     .run(QueryRequest::new("vacation policy", ["handbook"]), RequestScope::new())
//!     .await?;
//! for item in &output.results {
//!     println!("{} {:.3} {}", item.passage_id, item.score, item.match_type);
//! }
//! ```

// Modules
pub mod bm25;
pub mod config;
pub mod db_adapter;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod model_adapter;
pub mod pipeline;
pub mod registry;
pub mod reranker;
pub mod retriever;
pub mod scope;
pub mod types;

// Re-exports for convenience
pub use bm25::{Bm25Config, KeywordPassage, KeywordStore};
pub use config::{
    KbrConfig, KnowledgeBaseConfig, MergeConfig, RerankConfig, RerankOverflow, RetrievalConfig,
    SharedConfig, CONFIG_ENV_VAR,
};
pub use db_adapter::{VectorIndexNeighbors, VECTOR_BACKEND};
pub use embedding::{create_embedding_backend, EmbeddingBackend};
pub use engine::{CompositeRetrievalEngine, ModalityReport, TargetRetrieval};
pub use errors::{IntoKbrResult, KbrError, KbrResult};
pub use gate::BackendGate;
pub use pipeline::{
    NeighborChunk, NeighborSource, PipelineDiagnostics, PipelineOutput, PipelineState,
    RetrievalPipeline, RetrievalPipelineBuilder, TargetStatus,
};
pub use registry::{
    KnowledgeBaseDescriptor, KnowledgeBaseRegistry, SearchTarget, StaticRegistry, TargetOverrides,
};
pub use reranker::{create_reranker_backend, RerankerBackend};
pub use retriever::{
    KeywordHit, KeywordIndexBackend, KeywordRetriever, QueryEmbeddingCache, Retriever,
    VectorRetriever,
};
pub use scope::{CancellationToken, RequestScope};
pub use types::{
    MatchType, MergedPassage, Modality, PassageId, Query, QueryRequest, RerankedCandidate,
    RetrievalCandidate, SearchResultItem,
};
