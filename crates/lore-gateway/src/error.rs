use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lore_core::RagError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Nginx's "client closed request".
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

/// Handler failure rendered as a JSON [`ErrorBody`].
#[derive(Debug)]
pub(crate) enum ApiError {
    Rag(RagError),
    BadRequest(String),
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self::Rag(e)
    }
}

impl ApiError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        let Self::Rag(e) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match e {
            RagError::Validation(_) | RagError::Archive(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Conflict(_) => StatusCode::CONFLICT,
            RagError::Load(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::Llm(_) | RagError::Index(_) => StatusCode::BAD_GATEWAY,
            RagError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            RagError::Io(_) | RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Rag(e) => e.to_string(),
            Self::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
