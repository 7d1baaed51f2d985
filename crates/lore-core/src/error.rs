use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::loader::LoaderError;

/// Failure of an ingestion or retrieval operation.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Caller-supplied input was rejected before any work started.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("completion backend: {0}")]
    Llm(#[from] lore_llm::LlmError),

    #[error("vector index: {0}")]
    Index(#[from] lore_index::IndexError),

    #[error("loading document: {0}")]
    Load(#[from] LoaderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive extraction failed: {0}")]
    Archive(String),

    /// A consistency check failed; indicates a backend contract violation.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RagError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Validation, not-found and conflict errors are the caller's fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_)
        )
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Run `fut` unless `cancel` fires first, in which case the future is dropped
/// and `Cancelled` is returned.
pub(crate) async fn cancellable<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    RagError: From<E>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RagError::Cancelled),
        res = fut => res.map_err(RagError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(RagError::validation("x").is_client_error());
        assert!(RagError::NotFound("x".into()).is_client_error());
        assert!(RagError::Conflict("x".into()).is_client_error());
        assert!(!RagError::Internal("x".into()).is_client_error());
        assert!(RagError::Cancelled.is_cancelled());
        assert!(!RagError::Cancelled.is_client_error());
    }

    #[test]
    fn backend_errors_convert() {
        let err: RagError = lore_llm::LlmError::RateLimited.into();
        assert!(matches!(err, RagError::Llm(_)));
        let err: RagError = lore_index::IndexError::Search("boom".into()).into();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok::<_, RagError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, async { Ok::<_, RagError>(7) })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellable_interrupts_pending_future() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            child.cancel();
        });
        let err = cancellable(
            &token,
            std::future::pending::<std::result::Result<(), RagError>>(),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
