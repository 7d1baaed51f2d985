//! Test-only scripted provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::{ChatStream, EmbeddingProvider, LlmProvider, Message};

/// Provider returning canned completions and bag-of-words embeddings.
///
/// Clones share their call counters and recorded prompts.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub dimension: usize,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Report 0 from `dimension()` even after embedding.
    pub hide_dimension: bool,
    /// Pause between streamed fragments.
    pub fragment_delay: Option<Duration>,
    embed_calls: Arc<AtomicUsize>,
    chat_calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            dimension: 16,
            fail_chat: false,
            fail_embed: false,
            hide_dimension: false,
            fragment_delay: None,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            chat_calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_chat() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_embed() -> Self {
        Self {
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Number of `embed`/`embed_batch` calls that reached the provider.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Number of `complete`/`stream_complete` calls.
    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Message sequences received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }

    /// Deterministic embedding: each lowercase word is hashed into a bucket,
    /// then the vector is L2-normalized. Texts sharing words score higher.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension.max(1)];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) % vector.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            {
                vector[bucket as usize] += 1.0;
            }
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn next_response(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl LlmProvider for MockProvider {
    async fn complete(&self, messages: &[Message], _temperature: f32) -> Result<String, LlmError> {
        self.next_response(messages)
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<ChatStream, LlmError> {
        let response = self.next_response(messages)?;
        let fragments: Vec<Result<String, LlmError>> = response
            .split_inclusive(' ')
            .map(|s| Ok(s.to_owned()))
            .collect();
        match self.fragment_delay {
            Some(delay) => {
                let stream = tokio_stream::StreamExt::throttle(tokio_stream::iter(fragments), delay);
                Ok(Box::pin(stream))
            }
            None => Ok(Box::pin(tokio_stream::iter(fragments))),
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        if self.hide_dimension || self.embed_calls() == 0 {
            0
        } else {
            self.dimension
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn scripted_responses_then_default() {
        let p = MockProvider::with_responses(vec!["first".into()]);
        assert_eq!(p.complete(&[], 0.0).await.unwrap(), "first");
        assert_eq!(p.complete(&[], 0.0).await.unwrap(), "mock response");
        assert_eq!(p.chat_calls(), 2);
    }

    #[tokio::test]
    async fn stream_reassembles_response() {
        let p = MockProvider::with_responses(vec!["one two three".into()]);
        let mut stream = p.stream_complete(&[], 0.0).await.unwrap();
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment.unwrap());
        }
        assert_eq!(out, "one two three");
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let p = MockProvider::default();
        let a = p.embed("alpha beta").await.unwrap();
        let b = p.embed("alpha beta").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn dimension_revealed_after_first_call() {
        let p = MockProvider::default();
        assert_eq!(p.dimension(), 0);
        p.embed_batch(&["x".to_owned()]).await.unwrap();
        assert_eq!(p.dimension(), 16);
    }

    #[tokio::test]
    async fn empty_batch_is_not_counted() {
        let p = MockProvider::default();
        p.embed_batch(&[]).await.unwrap();
        assert_eq!(p.embed_calls(), 0);
    }

    #[tokio::test]
    async fn prompts_are_recorded() {
        let p = MockProvider::default();
        p.complete(&[Message::user("q")], 0.5).await.unwrap();
        assert_eq!(p.prompts()[0][0].content, "q");
    }
}
