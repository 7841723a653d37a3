use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::types::JobState;

/// Errors raised by the job queue: producer, broker and registry.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The durable store could not be reached or the write failed.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A job key has no registered handler.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Job key must be a non-empty string")]
    InvalidKey,

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// The lease is no longer held: it expired and the job was recovered or
    /// re-leased by another worker.
    #[error("Lease lost for job {0}")]
    LeaseLost(Uuid),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} is {state}, operation not allowed")]
    InvalidState { id: Uuid, state: JobState },
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::BrokerUnavailable(err.to_string())
    }
}

/// Common error types used across the HTTP surface.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Queue(err) => match err {
                QueueError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                QueueError::InvalidKey
                | QueueError::InvalidPayload(_)
                | QueueError::UnknownJobType(_) => StatusCode::BAD_REQUEST,
                QueueError::NotFound(_) => StatusCode::NOT_FOUND,
                QueueError::InvalidState { .. } | QueueError::LeaseLost(_) => {
                    StatusCode::CONFLICT
                }
            },
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
