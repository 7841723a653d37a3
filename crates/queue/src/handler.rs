use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a handler execution.
///
/// The variant decides what the worker does next: retryable failures are
/// released with backoff until the job's `max_attempts` is spent, everything
/// else dead-letters the job immediately without consuming a retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload is malformed or incomplete. Never retried.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// Transient failure of the external effect (mail relay down, 4xx/5xx).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The execution outlived its lease budget.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Any other non-recoverable failure (e.g. unknown template).
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transport(_) | HandlerError::Timeout(_))
    }
}

/// Stateless behavior bound to a job-type key.
///
/// Handlers are registered once at process start and shared read-only by
/// every worker, so implementations must be safe for concurrent calls.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Key this handler is registered under by `HandlerRegistry::register_handler`.
    fn key(&self) -> &'static str;

    /// Execute one attempt of a job with its payload.
    async fn handle(&self, payload: &serde_json::Value) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HandlerError::Transport("connection refused".into()).is_retryable());
        assert!(HandlerError::Timeout(Duration::from_secs(60)).is_retryable());
        assert!(!HandlerError::Validation("missing student".into()).is_retryable());
        assert!(!HandlerError::Fatal("unknown template".into()).is_retryable());
    }
}
