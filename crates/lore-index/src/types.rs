use serde::{Deserialize, Serialize};

/// Contiguous span of source text belonging to one knowledge base.
///
/// `id` always equals `content_hash`: identical text maps to one chunk no
/// matter which file or ingestion produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub knowledge_base: String,
    /// Path of the originating file relative to the ingested root.
    pub source: String,
    /// Zero-based index of this chunk within its source.
    pub position: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content_hash: String,
}

/// A chunk returned by a similarity search. Higher scores are more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}
