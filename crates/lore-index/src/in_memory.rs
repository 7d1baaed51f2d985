use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::IndexError;
use crate::types::{Chunk, SearchResult};
use crate::vector_index::{BoxFuture, VectorIndex};

/// Chunks keyed by `(knowledge_base, id)`.
type ChunkMap = HashMap<(String, String), Chunk>;

struct Collection {
    dimension: usize,
    chunks: ChunkMap,
}

/// Process-local index with brute-force cosine search.
pub struct InMemoryIndex {
    collection: RwLock<Option<Collection>>,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(None),
        }
    }

    /// Number of stored chunks across all knowledge bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collection
            .read()
            .map_or(0, |guard| guard.as_ref().map_or(0, |c| c.chunks.len()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryIndex {
    fn ensure_collection(&self, dimension: u64) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(async move {
            let dimension = usize::try_from(dimension)
                .map_err(|e| IndexError::Collection(e.to_string()))?;
            let mut guard = self
                .collection
                .write()
                .map_err(|e| IndexError::Collection(e.to_string()))?;
            guard.get_or_insert_with(|| Collection {
                dimension,
                chunks: HashMap::new(),
            });
            Ok(())
        })
    }

    fn upsert(&self, chunks: Vec<Chunk>) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(async move {
            let mut guard = self
                .collection
                .write()
                .map_err(|e| IndexError::Upsert(e.to_string()))?;
            let collection = guard
                .as_mut()
                .ok_or_else(|| IndexError::Upsert("collection not created".into()))?;

            for chunk in &chunks {
                let vector = chunk
                    .vector
                    .as_ref()
                    .ok_or_else(|| IndexError::MissingVector {
                        id: chunk.id.clone(),
                    })?;
                if vector.len() != collection.dimension {
                    return Err(IndexError::DimensionMismatch {
                        expected: collection.dimension,
                        actual: vector.len(),
                    });
                }
            }
            for chunk in chunks {
                let key = (chunk.knowledge_base.clone(), chunk.id.clone());
                collection.chunks.insert(key, chunk);
            }
            Ok(())
        })
    }

    fn search<'a>(
        &'a self,
        knowledge_bases: &'a [String],
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'a, Result<Vec<SearchResult>, IndexError>> {
        Box::pin(async move {
            let guard = self
                .collection
                .read()
                .map_err(|e| IndexError::Search(e.to_string()))?;
            let Some(collection) = guard.as_ref() else {
                return Ok(Vec::new());
            };

            let mut scored: Vec<SearchResult> = collection
                .chunks
                .values()
                .filter(|c| knowledge_bases.iter().any(|kb| *kb == c.knowledge_base))
                .filter_map(|c| {
                    let stored = c.vector.as_deref()?;
                    Some(SearchResult {
                        score: cosine_similarity(&vector, stored),
                        chunk: c.clone(),
                    })
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk.id.cmp(&b.chunk.id))
                    .then_with(|| a.chunk.knowledge_base.cmp(&b.chunk.knowledge_base))
            });
            scored.truncate(usize::try_from(top_k).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn list_knowledge_bases(&self) -> BoxFuture<'_, Result<BTreeMap<String, usize>, IndexError>> {
        Box::pin(async move {
            let guard = self
                .collection
                .read()
                .map_err(|e| IndexError::Scroll(e.to_string()))?;
            let mut counts = BTreeMap::new();
            if let Some(collection) = guard.as_ref() {
                for chunk in collection.chunks.values() {
                    *counts.entry(chunk.knowledge_base.clone()).or_insert(0) += 1;
                }
            }
            Ok(counts)
        })
    }

    fn delete_knowledge_base<'a>(
        &'a self,
        knowledge_base: &'a str,
    ) -> BoxFuture<'a, Result<(), IndexError>> {
        Box::pin(async move {
            let mut guard = self
                .collection
                .write()
                .map_err(|e| IndexError::Delete(e.to_string()))?;
            if let Some(collection) = guard.as_mut() {
                collection
                    .chunks
                    .retain(|_, c| c.knowledge_base != knowledge_base);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kb: &str, text: &str, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: text.to_owned(),
            knowledge_base: kb.to_owned(),
            source: "doc.txt".into(),
            position: 0,
            text: text.to_owned(),
            vector: Some(vector),
            tags: vec![],
            content_hash: text.to_owned(),
        }
    }

    async fn seeded() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index.ensure_collection(3).await.unwrap();
        index
            .upsert(vec![
                chunk("hr", "a", vec![1.0, 0.0, 0.0]),
                chunk("hr", "b", vec![0.0, 1.0, 0.0]),
                chunk("legal", "c", vec![0.9, 0.1, 0.0]),
                chunk("ops", "d", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let index = InMemoryIndex::new();
        index.ensure_collection(3).await.unwrap();
        index.ensure_collection(3).await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_any_knowledge_base() {
        let index = seeded().await;
        let kbs = vec!["hr".to_owned(), "legal".to_owned()];
        let results = index.search(&kbs, vec![1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.id, "a");
        assert_eq!(results[1].chunk.id, "c");
        assert!(results.iter().all(|r| r.chunk.knowledge_base != "ops"));
    }

    #[tokio::test]
    async fn search_truncates_to_top_k() {
        let index = seeded().await;
        let kbs = vec!["hr".to_owned(), "legal".to_owned(), "ops".to_owned()];
        let results = index.search(&kbs, vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn search_without_collection_is_empty() {
        let index = InMemoryIndex::new();
        let results = index
            .search(&["hr".to_owned()], vec![1.0], 5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_same_hash() {
        let index = seeded().await;
        index
            .upsert(vec![chunk("hr", "a", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.len(), 4);
    }

    #[tokio::test]
    async fn same_hash_in_another_knowledge_base_is_a_separate_chunk() {
        let index = seeded().await;
        index
            .upsert(vec![chunk("legal", "a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.len(), 5);

        let counts = index.list_knowledge_bases().await.unwrap();
        assert_eq!(counts.get("hr"), Some(&2));
        assert_eq!(counts.get("legal"), Some(&2));

        index.delete_knowledge_base("legal").await.unwrap();
        let results = index
            .search(&["hr".to_owned()], vec![1.0, 0.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.id, "a");
        assert_eq!(results[0].chunk.knowledge_base, "hr");
    }

    #[tokio::test]
    async fn upsert_rejects_missing_vector() {
        let index = seeded().await;
        let mut c = chunk("hr", "z", vec![]);
        c.vector = None;
        let err = index.upsert(vec![c]).await.unwrap_err();
        assert!(matches!(err, IndexError::MissingVector { .. }));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let index = seeded().await;
        let err = index
            .upsert(vec![chunk("hr", "z", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn upsert_before_collection_fails() {
        let index = InMemoryIndex::new();
        assert!(index.upsert(vec![chunk("hr", "a", vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn list_counts_per_knowledge_base() {
        let index = seeded().await;
        let counts = index.list_knowledge_bases().await.unwrap();
        assert_eq!(counts.get("hr"), Some(&2));
        assert_eq!(counts.get("legal"), Some(&1));
        assert_eq!(counts.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_only_that_knowledge_base() {
        let index = seeded().await;
        index.delete_knowledge_base("hr").await.unwrap();
        let counts = index.list_knowledge_bases().await.unwrap();
        assert!(!counts.contains_key("hr"));
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn delete_without_collection_is_noop() {
        let index = InMemoryIndex::default();
        index.delete_knowledge_base("missing").await.unwrap();
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
    }
}
