use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{ChatStream, EmbeddingProvider, LlmProvider, Message, non_blank};
use crate::sse::completion_stream;

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

/// Backend speaking the `OpenAI` HTTP API (also served by Azure `OpenAI`
/// deployments behind a compatible proxy, vLLM, LM Studio and similar).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
    dimension: Arc<AtomicUsize>,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("max_tokens", &self.max_tokens)
            .field("dimension", &self.dimension.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        model: String,
        embedding_model: String,
        max_tokens: u32,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: crate::http::build_client(request_timeout)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            embedding_model,
            max_tokens,
            dimension: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_chat(
        &self,
        messages: &[Message],
        temperature: f32,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let api_messages = convert_messages(messages);
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            temperature,
            stream,
        };

        let mut attempt = 0;
        loop {
            let response = self.post("chat/completions").json(&body).send().await?;
            match check_status(response, "chat completion").await {
                Err(LlmError::RateLimited) if attempt == 0 => {
                    attempt += 1;
                    tracing::warn!(
                        backoff_ms = RATE_LIMIT_BACKOFF.as_millis(),
                        "completion backend rate limited, retrying once"
                    );
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    async fn send_embeddings(&self, input: EmbeddingInput<'_>) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input,
        };
        let response = self.post("embeddings").json(&body).send().await?;
        let response = check_status(response, "embedding").await?;
        let text = response.text().await?;
        let resp: EmbeddingResponse = serde_json::from_str(&text)?;

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        if let Some(first) = vectors.first() {
            let _ = self.dimension.compare_exchange(
                0,
                first.len(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
        Ok(vectors)
    }
}

async fn check_status(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(LlmError::Unavailable);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::error!(%status, body = %text, "{operation} request rejected");
        return Err(LlmError::Other(format!(
            "{operation} request failed (status {status})"
        )));
    }
    Ok(response)
}

impl LlmProvider for OpenAiProvider {
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError> {
        let response = self.send_chat(messages, temperature, false).await?;
        let text = response.text().await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse {
                provider: "openai".into(),
            })
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<ChatStream, LlmError> {
        let response = self.send_chat(messages, temperature, true).await?;
        Ok(completion_stream(response))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.send_embeddings(EmbeddingInput::Single(text))
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: "openai".into(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.send_embeddings(EmbeddingInput::Batch(texts)).await
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Acquire)
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
    non_blank(messages)
        .map(|msg| ApiMessage {
            role: msg.role.as_str(),
            content: &msg.content,
        })
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(
            Some("sk-test-key".into()),
            base_url,
            "gpt-4o".into(),
            "text-embedding-3-large".into(),
            1024,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let p = provider("https://api.openai.com/v1/");
        assert_eq!(p.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let p = OpenAiProvider::new(
            Some("  ".into()),
            "http://localhost:8000/v1",
            "m".into(),
            "e".into(),
            16,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(p.api_key.is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let dbg = format!("{:?}", provider("https://api.openai.com/v1"));
        assert!(!dbg.contains("sk-test-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn dimension_is_zero_before_first_call() {
        assert_eq!(provider("https://api.openai.com/v1").dimension(), 0);
    }

    #[test]
    fn name_returns_openai() {
        assert_eq!(provider("https://api.openai.com/v1").name(), "openai");
    }

    #[test]
    fn convert_messages_skips_blank_and_maps_roles() {
        let messages = vec![
            Message::system("rules"),
            Message::system(""),
            Message::user("question"),
            Message::assistant("answer"),
        ];
        let api = convert_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[2].role, "assistant");
    }

    #[test]
    fn chat_request_serialization() {
        let messages = [ApiMessage {
            role: Role::User.as_str(),
            content: "hi",
        }];
        let body = ChatRequest {
            model: "gpt-4o",
            messages: &messages,
            max_tokens: 64,
            temperature: 0.2,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn stream_flag_serialized_when_set() {
        let body = ChatRequest {
            model: "gpt-4o",
            messages: &[],
            max_tokens: 64,
            temperature: 0.0,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn embedding_input_serializes_single_and_batch() {
        let single = EmbeddingRequest {
            model: "e",
            input: EmbeddingInput::Single("one"),
        };
        assert_eq!(serde_json::to_value(&single).unwrap()["input"], "one");

        let texts = vec!["a".to_owned(), "b".to_owned()];
        let batch = EmbeddingRequest {
            model: "e",
            input: EmbeddingInput::Batch(&texts),
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap()["input"],
            serde_json::json!(["a", "b"])
        );
    }

    #[test]
    fn embedding_response_parses_indices() {
        let json = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.1]}]}"#;
        let mut resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        resp.data.sort_by_key(|d| d.index);
        assert_eq!(resp.data[0].embedding, vec![0.1]);
    }

    #[test]
    fn chat_response_with_null_content() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.choices[0].message.content.is_none());
    }

    #[tokio::test]
    async fn complete_unreachable_endpoint_errors() {
        let p = provider("http://127.0.0.1:1");
        let result = p.complete(&[Message::user("test")], 0.2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_unreachable_endpoint_errors() {
        let p = provider("http://127.0.0.1:1");
        assert!(
            p.stream_complete(&[Message::user("test")], 0.2)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn embed_unreachable_endpoint_errors() {
        let p = provider("http://127.0.0.1:1");
        assert!(p.embed("test").await.is_err());
    }

    #[tokio::test]
    async fn embed_batch_empty_skips_request() {
        let p = provider("http://127.0.0.1:1");
        let vectors = p.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
