//! Knowledge bases are implicit: they exist while chunks carry their id.

use std::sync::Arc;

use lore_index::VectorIndex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result, cancellable};
use crate::normalize::dedupe_ignore_case;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    pub id: String,
    pub chunks: usize,
}

/// A knowledge base accepted by [`Catalog::create`]. Nothing is stored until
/// the first ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseDraft {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct Catalog<V: ?Sized = dyn VectorIndex> {
    index: Arc<V>,
}

impl<V: ?Sized> Clone for Catalog<V> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
        }
    }
}

impl<V: VectorIndex + ?Sized> Catalog<V> {
    #[must_use]
    pub fn new(index: Arc<V>) -> Self {
        Self { index }
    }

    /// Every knowledge base with its chunk count, sorted by id ignoring case.
    ///
    /// # Errors
    ///
    /// Returns index failures or `Cancelled`.
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<KnowledgeBaseSummary>> {
        let counts = cancellable(cancel, self.index.list_knowledge_bases()).await?;
        let mut summaries: Vec<KnowledgeBaseSummary> = counts
            .into_iter()
            .map(|(id, chunks)| KnowledgeBaseSummary { id, chunks })
            .collect();
        summaries.sort_by_cached_key(|s| (s.id.to_lowercase(), s.id.clone()));
        Ok(summaries)
    }

    /// Validate a new knowledge base id.
    ///
    /// # Errors
    ///
    /// `Validation` when the id is blank, `Conflict` when chunks already use
    /// it.
    pub async fn create(
        &self,
        draft: KnowledgeBaseDraft,
        cancel: &CancellationToken,
    ) -> Result<KnowledgeBaseDraft> {
        let id = draft.id.trim();
        if id.is_empty() {
            return Err(RagError::validation("knowledge base id must not be blank"));
        }
        let counts = cancellable(cancel, self.index.list_knowledge_bases()).await?;
        if counts.get(id).is_some_and(|&n| n > 0) {
            return Err(RagError::Conflict(format!("knowledge base {id}")));
        }
        Ok(KnowledgeBaseDraft {
            id: id.to_owned(),
            tags: dedupe_ignore_case(&draft.tags),
        })
    }

    /// Remove every chunk of `id`. Unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// `Validation` when the id is blank, index failures, or `Cancelled`.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RagError::validation("knowledge base id must not be blank"));
        }
        cancellable(cancel, self.index.delete_knowledge_base(id)).await?;
        tracing::info!(knowledge_base = id, "knowledge base deleted");
        Ok(())
    }
}
