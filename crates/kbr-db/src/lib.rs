//! # kbr-db
//!
//! Storage layer for KBR - vector collections partitioned per knowledge base.
//!
//! This crate keeps the vector-store implementations away from the retrieval
//! kernel in `kbr-core`. The kernel only sees the [`vector::VectorIndexBackend`]
//! trait, so engines can be swapped without touching pipeline logic.
//!
//! ## Architecture
//!
//! ```text
//! kbr-core (pipeline) → VectorIndexBackend (trait)
//!                            ↑
//!                         kbr-db (simple JSONL / in-memory backend)
//! ```
//!
//! ## Isolation
//!
//! Every stored vector belongs to exactly one knowledge base. Backends keep a
//! separate collection per knowledge base, so a query for one knowledge base
//! never scans another's data.
//!
//! ## Features
//!
//! - `simple` (default): JSONL-backed vector store with linear scan
//!
//! ## Usage
//!
//! ```ignore
//! use kbr_db::vector::{open_vector_index, VectorIndexConfig, VectorSearchFilter};
//!
//! let config = VectorIndexConfig::new(384, "/path/to/index");
//! let index = open_vector_index(&config)?;
//!
//! index.upsert(&inserts)?;
//!
//! let filter = VectorSearchFilter::new().with_knowledge_id("doc-7");
//! let results = index.query("kb-support", &embedding, 10, Some(&filter))?;
//! ```

pub mod error;
pub mod vector;

pub use error::{DbError, DbResult};
