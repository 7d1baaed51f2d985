use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatStream, EmbeddingProvider, LlmProvider, Message, Role, non_blank};

const DEFAULT_PORT: u16 = 11434;

/// Local backend served by an Ollama daemon.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
    dimension: Arc<AtomicUsize>,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = split_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
            dimension: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn chat_request(&self, messages: &[Message], temperature: f32) -> ChatMessageRequest {
        let messages = non_blank(messages).map(convert_message).collect();
        ChatMessageRequest::new(self.model.clone(), messages)
            .options(ModelOptions::default().temperature(temperature))
    }

    async fn generate(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(self.embedding_model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        if let Some(first) = response.embeddings.first() {
            let _ = self.dimension.compare_exchange(
                0,
                first.len(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        Ok(response.embeddings)
    }
}

impl LlmProvider for OllamaProvider {
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError> {
        let response = self
            .client
            .send_chat_messages(self.chat_request(messages, temperature))
            .await
            .map_err(|e| LlmError::Other(format!("Ollama chat request failed: {e}")))?;

        Ok(response.message.content)
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<ChatStream, LlmError> {
        let stream = self
            .client
            .send_chat_messages_stream(self.chat_request(messages, temperature))
            .await
            .map_err(|e| LlmError::Other(format!("Ollama streaming request failed: {e}")))?;

        let fragments = stream.filter_map(|item| match item {
            Ok(response) if response.message.content.is_empty() => None,
            Ok(response) => Some(Ok(response.message.content)),
            Err(()) => Some(Err(LlmError::Other("Ollama stream chunk failed".into()))),
        });

        Ok(Box::pin(fragments))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.generate(EmbeddingsInput::from(text))
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: "ollama".into(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.generate(EmbeddingsInput::Multiple(texts.to_vec()))
            .await
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Acquire)
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::User => ChatMessage::user(text),
        Role::Assistant => ChatMessage::assistant(text),
    }
}

fn split_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some((host, port)) = url.rsplit_once(':')
        && let Ok(port) = port.parse::<u16>()
    {
        return (host.to_owned(), port);
    }
    (url.to_owned(), DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ollama_rs::generation::chat::MessageRole;

    #[test]
    fn split_host_port_with_port() {
        let (host, port) = split_host_port("http://localhost:11500/");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11500);
    }

    #[test]
    fn split_host_port_defaults() {
        let (host, port) = split_host_port("http://ollama.internal");
        assert_eq!(host, "http://ollama.internal");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn convert_message_roles() {
        assert!(matches!(
            convert_message(&Message::system("s")).role,
            MessageRole::System
        ));
        assert!(matches!(
            convert_message(&Message::user("u")).role,
            MessageRole::User
        ));
        assert!(matches!(
            convert_message(&Message::assistant("a")).role,
            MessageRole::Assistant
        ));
    }

    #[test]
    fn convert_message_preserves_content() {
        let converted = convert_message(&Message::user("Qual é o prazo?"));
        assert_eq!(converted.content, "Qual é o prazo?");
    }

    #[test]
    fn dimension_unknown_until_embedding() {
        let p = OllamaProvider::new("http://localhost:11434", "m".into(), "e".into());
        assert_eq!(p.dimension(), 0);
        assert_eq!(p.name(), "ollama");
    }

    #[tokio::test]
    async fn embed_batch_empty_skips_request() {
        let p = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        assert!(p.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_unreachable_endpoint_errors() {
        let p = OllamaProvider::new("http://127.0.0.1:1", "m".into(), "e".into());
        assert!(p.complete(&[Message::user("hi")], 0.2).await.is_err());
    }
}
