use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::IndexError;
use crate::types::{Chunk, SearchResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage for embedded chunks, partitioned by knowledge base.
///
/// Implementations are shared behind `Arc<dyn VectorIndex>` and synchronize
/// internally.
pub trait VectorIndex: Send + Sync {
    /// Create the backing collection for vectors of `dimension` if it does not
    /// exist yet. Calling it again is a no-op.
    fn ensure_collection(&self, dimension: u64) -> BoxFuture<'_, Result<(), IndexError>>;

    /// Insert or overwrite chunks keyed by knowledge base and content hash.
    /// Every chunk must carry a vector.
    fn upsert(&self, chunks: Vec<Chunk>) -> BoxFuture<'_, Result<(), IndexError>>;

    /// Nearest neighbours of `vector` among chunks whose knowledge base is any
    /// of `knowledge_bases`, best first, at most `top_k`.
    fn search<'a>(
        &'a self,
        knowledge_bases: &'a [String],
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'a, Result<Vec<SearchResult>, IndexError>>;

    /// Chunk counts per knowledge base id.
    fn list_knowledge_bases(&self) -> BoxFuture<'_, Result<BTreeMap<String, usize>, IndexError>>;

    /// Remove every chunk of one knowledge base.
    fn delete_knowledge_base<'a>(
        &'a self,
        knowledge_base: &'a str,
    ) -> BoxFuture<'a, Result<(), IndexError>>;
}

/// Namespace for deterministic point ids derived from content hashes.
const POINT_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x6c6f_7265_2d63_686b_8e1f_4a2b_9c3d_5e70);

/// Stable point id for a chunk hash within one knowledge base.
///
/// Re-ingesting identical text into the same knowledge base overwrites the
/// existing point; the same text in another knowledge base gets its own.
#[must_use]
pub fn point_id(knowledge_base: &str, content_hash: &str) -> String {
    let key = format!("{knowledge_base}\0{content_hash}");
    uuid::Uuid::new_v5(&POINT_NAMESPACE, key.as_bytes()).to_string()
}
