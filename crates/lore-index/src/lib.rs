//! Chunk model and vector index backends.

pub mod error;
pub mod in_memory;
pub mod qdrant;
pub mod types;
pub mod vector_index;

pub use error::{IndexError, Result};
pub use in_memory::InMemoryIndex;
pub use qdrant::QdrantIndex;
pub use types::{Chunk, SearchResult};
pub use vector_index::{BoxFuture, VectorIndex};
