//! Vector index module for kbr-db.
//!
//! ## Available Backends
//!
//! - `simple` (default): JSONL file or pure in-memory storage, linear scan
//!
//! ## Usage
//!
//! ```ignore
//! use kbr_db::vector::{VectorIndexConfig, open_vector_index};
//!
//! let config = VectorIndexConfig::new(384, "/path/to/index");
//! let index = open_vector_index(&config)?;
//! let results = index.query("kb-1", &embedding, 10, None)?;
//! ```

mod backend;
mod config;
mod filter;
mod traits;

pub use config::{
    inspect_index, load_index_meta, write_index_meta, IndexState, VectorIndexConfig,
    VectorIndexMeta, DEFAULT_BACKEND, INDEX_META_FILENAME, MEMORY_BACKEND,
};
pub use filter::VectorSearchFilter;
pub use traits::{VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult};

pub use backend::{available_backends, open_vector_index};

#[cfg(feature = "simple")]
pub use backend::SimpleVectorIndex;
