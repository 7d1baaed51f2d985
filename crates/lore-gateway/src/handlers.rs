use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use lore_core::{
    AnswerStream, ChatRequest, Citation, IngestionRequest, IngestionResult, KnowledgeBaseDraft,
    KnowledgeBaseSummary, RagError,
};
use serde::Serialize;
use tempfile::NamedTempFile;

use super::error::{ApiError, ErrorBody};
use super::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct TokenEvent<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct CitationsEvent<'a> {
    citations: &'a [Citation],
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub(crate) async fn list_knowledge_bases_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<KnowledgeBaseSummary>>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.app.catalog.list(&cancel).await?))
}

pub(crate) async fn create_knowledge_base_handler(
    State(state): State<AppState>,
    Json(draft): Json<KnowledgeBaseDraft>,
) -> Result<(StatusCode, Json<KnowledgeBaseDraft>), ApiError> {
    let cancel = state.shutdown.child_token();
    let created = state.app.catalog.create(draft, &cancel).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn delete_knowledge_base_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state.app.catalog.delete(&id, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts either a JSON [`IngestionRequest`] naming a server-side path or a
/// multipart upload carrying a `.zip` archive.
pub(crate) async fn ingest_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<IngestionResult>, ApiError> {
    let cancel = state.shutdown.child_token();
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let (ingestion, _archive) = read_upload(multipart).await?;
        let result = state.app.ingestion.ingest(ingestion, &cancel).await?;
        return Ok(Json(result));
    }

    let Json(ingestion) = Json::<IngestionRequest>::from_request(request, &state)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(state.app.ingestion.ingest(ingestion, &cancel).await?))
}

/// Collect the form fields and spool the archive part to a temporary file,
/// which is removed when the returned guard drops.
async fn read_upload(
    mut multipart: Multipart,
) -> Result<(IngestionRequest, NamedTempFile), ApiError> {
    let mut request = IngestionRequest::default();
    let mut archive = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        if let Some(file_name) = field.file_name().map(str::to_owned) {
            if !file_name.to_ascii_lowercase().ends_with(".zip") {
                return Err(ApiError::bad_request(format!(
                    "uploaded file {file_name} is not a .zip archive"
                )));
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            let file = tempfile::Builder::new()
                .prefix("lore-upload-")
                .suffix(".zip")
                .tempfile()
                .map_err(RagError::from)?;
            tokio::fs::write(file.path(), &bytes)
                .await
                .map_err(RagError::from)?;
            tracing::debug!(%file_name, bytes = bytes.len(), "archive uploaded");
            archive = Some(file);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        match name.as_str() {
            "knowledge_base" => request.knowledge_base = value,
            "tags" => request.tags = value.split(',').map(str::to_owned).collect(),
            "chunk_size" => request.chunk_size = Some(parse_number(&name, &value)?),
            "chunk_overlap" => request.chunk_overlap = Some(parse_number(&name, &value)?),
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }

    let archive =
        archive.ok_or_else(|| ApiError::bad_request("multipart upload needs a .zip file part"))?;
    request.path = archive.path().to_path_buf();
    Ok((request, archive))
}

fn parse_number(name: &str, value: &str) -> Result<usize, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{name} must be a non-negative integer")))
}

pub(crate) async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let cancel = state.shutdown.child_token();
    if wants_event_stream(&headers) {
        let stream = state.app.chat.answer_stream(request, &cancel).await?;
        return Ok(Sse::new(answer_events(stream))
            .keep_alive(KeepAlive::default())
            .into_response());
    }
    let answer = state.app.chat.answer(request, &cancel).await?;
    Ok(Json(answer).into_response())
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// One `data` event per fragment, then a `citations` event; a failure ends
/// the stream with an `error` event instead.
fn answer_events(stream: AnswerStream) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.next().await {
            Some(Ok(token)) => {
                let event = json_event(Event::default(), &TokenEvent { token: &token });
                Some((Ok(event), Some(stream)))
            }
            Some(Err(e)) => {
                if e.is_cancelled() {
                    tracing::warn!("chat stream cancelled");
                } else {
                    tracing::error!(error = %e, "chat stream failed");
                }
                let body = ErrorBody {
                    error: e.to_string(),
                };
                Some((Ok(json_event(Event::default().event("error"), &body)), None))
            }
            None => {
                let citations = stream.citations().unwrap_or_default();
                let event = json_event(
                    Event::default().event("citations"),
                    &CitationsEvent { citations },
                );
                Some((Ok(event), None))
            }
        }
    })
}

fn json_event(event: Event, data: &impl Serialize) -> Event {
    match serde_json::to_string(data) {
        Ok(json) => event.data(json),
        Err(e) => Event::default()
            .event("error")
            .data(format!("{{\"error\":\"serialization failed: {e}\"}}")),
    }
}
