//! Qdrant-backed vector index.

use std::collections::{BTreeMap, HashMap};

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointId, PointStruct, ScoredPoint, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder, value::Kind,
};

use crate::error::IndexError;
use crate::types::{Chunk, SearchResult};
use crate::vector_index::{BoxFuture, VectorIndex, point_id};

const FIELD_KNOWLEDGE_BASE: &str = "knowledge_base";
const FIELD_SOURCE: &str = "source";
const FIELD_POSITION: &str = "position";
const FIELD_HASH: &str = "content_hash";
const FIELD_TEXT: &str = "text";
const FIELD_TAGS: &str = "tags";

const SCROLL_PAGE: u32 = 128;

/// One Qdrant collection holding the chunks of every knowledge base.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QdrantIndex {
    /// Connect to the gRPC endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created from the URL.
    pub fn new(url: &str, collection: &str, api_key: Option<String>) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| IndexError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.to_owned(),
        })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        self.client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| IndexError::Connection(e.to_string()))
    }

    async fn create(&self, dimension: u64) -> Result<(), IndexError> {
        if self.exists().await? {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await
            .map_err(|e| IndexError::Collection(e.to_string()))?;
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                FIELD_KNOWLEDGE_BASE,
                FieldType::Keyword,
            ))
            .await
            .map_err(|e| IndexError::Collection(e.to_string()))?;
        tracing::info!(collection = %self.collection, dimension, "created vector collection");
        Ok(())
    }

    async fn write(&self, chunks: Vec<Chunk>) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let points = chunks
            .into_iter()
            .map(to_point)
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| IndexError::Upsert(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        knowledge_bases: &[String],
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        let filter = Filter::should(
            knowledge_bases
                .iter()
                .map(|kb| Condition::matches(FIELD_KNOWLEDGE_BASE, kb.clone()))
                .collect::<Vec<_>>(),
        );
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, top_k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|e| IndexError::Search(e.to_string()))?;

        Ok(response.result.iter().filter_map(from_scored_point).collect())
    }

    async fn count_by_knowledge_base(&self) -> Result<BTreeMap<String, usize>, IndexError> {
        let mut counts = BTreeMap::new();
        if !self.exists().await? {
            return Ok(counts);
        }

        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .with_payload(true)
                .with_vectors(false)
                .limit(SCROLL_PAGE);
            if let Some(off) = offset.take() {
                builder = builder.offset(off);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| IndexError::Scroll(e.to_string()))?;

            for point in &response.result {
                if let Some(kb) = point.payload.get(FIELD_KNOWLEDGE_BASE).and_then(Value::as_str) {
                    *counts.entry(kb.clone()).or_insert(0) += 1;
                }
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(counts)
    }

    async fn remove_knowledge_base(&self, knowledge_base: &str) -> Result<(), IndexError> {
        if !self.exists().await? {
            return Ok(());
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(Filter::must([Condition::matches(
                        FIELD_KNOWLEDGE_BASE,
                        knowledge_base.to_owned(),
                    )]))
                    .wait(true),
            )
            .await
            .map_err(|e| IndexError::Delete(e.to_string()))?;
        tracing::info!(knowledge_base, "deleted knowledge base");
        Ok(())
    }
}

fn to_point(chunk: Chunk) -> Result<PointStruct, IndexError> {
    let Some(vector) = chunk.vector else {
        return Err(IndexError::MissingVector { id: chunk.id });
    };
    let payload: HashMap<String, Value> = serde_json::from_value(serde_json::json!({
        FIELD_KNOWLEDGE_BASE: chunk.knowledge_base,
        FIELD_SOURCE: chunk.source,
        FIELD_POSITION: chunk.position,
        FIELD_HASH: chunk.content_hash,
        FIELD_TEXT: chunk.text,
        FIELD_TAGS: chunk.tags,
    }))
    .map_err(|e| IndexError::Serialization(e.to_string()))?;

    Ok(PointStruct::new(point_id(&chunk.knowledge_base, &chunk.id), vector, payload))
}

fn from_scored_point(point: &ScoredPoint) -> Option<SearchResult> {
    let p = &point.payload;
    let get_str = |key: &str| p.get(key).and_then(Value::as_str).cloned();
    let position = p
        .get(FIELD_POSITION)
        .and_then(Value::as_integer)
        .and_then(|v| usize::try_from(v).ok())?;
    let tags = match p.get(FIELD_TAGS).and_then(|v| v.kind.as_ref()) {
        Some(Kind::ListValue(list)) => list
            .values
            .iter()
            .filter_map(|v| v.as_str().cloned())
            .collect(),
        _ => Vec::new(),
    };
    let content_hash = get_str(FIELD_HASH)?;

    Some(SearchResult {
        chunk: Chunk {
            id: content_hash.clone(),
            knowledge_base: get_str(FIELD_KNOWLEDGE_BASE)?,
            source: get_str(FIELD_SOURCE)?,
            position,
            text: get_str(FIELD_TEXT)?,
            vector: None,
            tags,
            content_hash,
        },
        score: point.score,
    })
}

impl VectorIndex for QdrantIndex {
    fn ensure_collection(&self, dimension: u64) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(self.create(dimension))
    }

    fn upsert(&self, chunks: Vec<Chunk>) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(self.write(chunks))
    }

    fn search<'a>(
        &'a self,
        knowledge_bases: &'a [String],
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'a, Result<Vec<SearchResult>, IndexError>> {
        Box::pin(self.query(knowledge_bases, vector, top_k))
    }

    fn list_knowledge_bases(&self) -> BoxFuture<'_, Result<BTreeMap<String, usize>, IndexError>> {
        Box::pin(self.count_by_knowledge_base())
    }

    fn delete_knowledge_base<'a>(
        &'a self,
        knowledge_base: &'a str,
    ) -> BoxFuture<'a, Result<(), IndexError>> {
        Box::pin(self.remove_knowledge_base(knowledge_base))
    }
}
