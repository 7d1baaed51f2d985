use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::ChatStream;

const DONE_MARKER: &str = "[DONE]";

/// Turn a streaming `/chat/completions` response into a fragment stream.
pub(crate) fn completion_stream(response: reqwest::Response) -> ChatStream {
    let events = response.bytes_stream().eventsource();
    let fragments = events
        .take_while(|event| !matches!(event, Ok(e) if e.data.trim() == DONE_MARKER))
        .filter_map(|event| match event {
            Ok(event) => parse_delta(&event.data),
            Err(e) => Some(Err(LlmError::SseParse(e.to_string()))),
        });
    Box::pin(fragments)
}

/// Extract the content fragment carried by one SSE data payload.
///
/// Keep-alive frames and deltas without content produce `None`.
fn parse_delta(data: &str) -> Option<Result<String, LlmError>> {
    let data = data.trim();
    if data.is_empty() || data == DONE_MARKER {
        return None;
    }

    let frame = match serde_json::from_str::<StreamFrame>(data) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(Err(LlmError::SseParse(format!(
                "malformed stream frame: {e}"
            ))));
        }
    };

    if let Some(err) = frame.error {
        return Some(Err(LlmError::SseParse(format!(
            "backend reported stream error: {}",
            err.message
        ))));
    }

    frame
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(Ok)
}

#[derive(Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}
