//! Retrieval-augmented answering over one or more knowledge bases.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use lore_index::{SearchResult, VectorIndex};
use lore_llm::{ChatStream, EmbeddingProvider, LlmProvider, Message};
use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::composer::{Citation, PromptComposer};
use crate::config::{MAX_TEMPERATURE, MAX_TOP_K, RagDefaults};
use crate::error::{RagError, Result, cancellable};
use crate::normalize::dedupe_ignore_case;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub knowledge_bases: Vec<String>,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new<I, S>(knowledge_bases: I, query: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            knowledge_bases: knowledge_bases.into_iter().map(Into::into).collect(),
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A complete answer and the passages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    pub citations: Vec<Citation>,
}

/// Everything the completion call needs, produced by one retrieval.
struct Prepared {
    messages: Vec<Message>,
    citations: Vec<Citation>,
    temperature: f32,
}

pub struct ChatService<P, V: ?Sized = dyn VectorIndex> {
    provider: Arc<P>,
    index: Arc<V>,
    composer: PromptComposer,
    defaults: RagDefaults,
}

impl<P, V: ?Sized> std::fmt::Debug for ChatService<P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl<P, V> ChatService<P, V>
where
    P: LlmProvider + EmbeddingProvider,
    V: VectorIndex + ?Sized,
{
    #[must_use]
    pub fn new(provider: Arc<P>, index: Arc<V>, defaults: RagDefaults) -> Self {
        Self {
            provider,
            index,
            composer: PromptComposer,
            defaults,
        }
    }

    /// Embed the query and return the best matching chunks across the
    /// requested knowledge bases, best first.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when no usable knowledge base id remains, the
    /// query is blank, or `top_k` is out of range.
    pub async fn retrieve(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        let knowledge_bases = dedupe_ignore_case(&request.knowledge_bases);
        if knowledge_bases.is_empty() {
            return Err(RagError::validation(
                "at least one knowledge base id is required",
            ));
        }
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::validation("query must not be blank"));
        }
        let top_k = request.top_k.unwrap_or(self.defaults.top_k);
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(RagError::validation(format!(
                "top_k must be within 1..={MAX_TOP_K}, got {top_k}"
            )));
        }

        let vector = cancellable(cancel, self.provider.embed(query)).await?;
        let results = cancellable(
            cancel,
            self.index.search(&knowledge_bases, vector, top_k as u64),
        )
        .await?;
        tracing::debug!(
            knowledge_bases = ?knowledge_bases,
            top_k,
            results = results.len(),
            "context retrieved"
        );
        Ok(results)
    }

    /// Retrieve context and wait for the full completion.
    ///
    /// # Errors
    ///
    /// Validation errors as for [`Self::retrieve`], backend failures, or
    /// `Cancelled`.
    pub async fn answer(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatAnswer> {
        let prepared = self.prepare(&request, cancel).await?;
        let response = cancellable(
            cancel,
            self.provider
                .complete(&prepared.messages, prepared.temperature),
        )
        .await?;
        Ok(ChatAnswer {
            response,
            citations: prepared.citations,
        })
    }

    /// Retrieve context and stream the completion fragment by fragment.
    ///
    /// Citations become available on the returned stream once it has ended
    /// or been cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`Self::answer`] for everything that happens before the first
    /// fragment.
    pub async fn answer_stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream> {
        let prepared = self.prepare(&request, cancel).await?;
        let inner = cancellable(
            cancel,
            self.provider
                .stream_complete(&prepared.messages, prepared.temperature),
        )
        .await?;
        Ok(AnswerStream::new(inner, prepared.citations, cancel.clone()))
    }

    async fn prepare(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<Prepared> {
        let temperature = request.temperature.unwrap_or(self.defaults.temperature);
        if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(RagError::validation(format!(
                "temperature must be within 0.0..={MAX_TEMPERATURE}, got {temperature}"
            )));
        }
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let results = self.retrieve(request, cancel).await?;
        let messages = self.composer.compose_messages(&request.query, &results)?;
        Ok(Prepared {
            messages,
            citations: self.composer.citations(&results),
            temperature,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// Single-pass stream of answer fragments.
///
/// Once the token fires, the next poll yields `Err(RagError::Cancelled)` and
/// the stream ends.
pub struct AnswerStream {
    inner: ChatStream,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    citations: Vec<Citation>,
    state: StreamState,
}

impl AnswerStream {
    fn new(inner: ChatStream, citations: Vec<Citation>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: Box::pin(cancel.cancelled_owned()),
            citations,
            state: StreamState::Streaming,
        }
    }

    /// Citations for the answer, available only after the stream completed
    /// or was cancelled.
    #[must_use]
    pub fn citations(&self) -> Option<&[Citation]> {
        match self.state {
            StreamState::Completed | StreamState::Cancelled => Some(&self.citations),
            StreamState::Streaming | StreamState::Failed => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state == StreamState::Cancelled
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("state", &self.state)
            .field("citations", &self.citations.len())
            .finish_non_exhaustive()
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Streaming {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.state = StreamState::Cancelled;
            tracing::warn!("answer stream cancelled");
            return Poll::Ready(Some(Err(RagError::Cancelled)));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => Poll::Ready(Some(Ok(fragment))),
            Poll::Ready(Some(Err(e))) => {
                this.state = StreamState::Failed;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.state = StreamState::Completed;
                Poll::Ready(None)
            }
        }
    }
}
