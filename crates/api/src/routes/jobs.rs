//! Job routes: enqueue, lookup, dead-letter inspection and manual retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gympoint_common::error::AppError;
use gympoint_common::types::{Job, JobState};

use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: i64 = 50;
const MAX_DEAD_LETTER_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(enqueue_job))
        .route("/api/jobs/dead-letter", get(list_dead_letters))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/retry", post(retry_job))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub key: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: Uuid,
    pub key: String,
    pub state: JobState,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<i64>,
}

/// POST /api/jobs: Record a job; 202 once it is durably stored.
async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let job = match req.max_attempts {
        Some(max_attempts) => {
            state
                .producer
                .enqueue_with(&req.key, &req.payload, max_attempts)
                .await?
        }
        None => state.producer.enqueue(&req.key, &req.payload).await?,
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            id: job.id,
            key: job.key,
            state: job.state,
        }),
    ))
}

/// GET /api/jobs/:id: Current record of one job.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    state
        .broker
        .find(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
}

/// GET /api/jobs/dead-letter: Jobs that ended without completing, newest first.
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<Job>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    let jobs = state.broker.dead_letters(limit).await?;
    Ok(Json(jobs))
}

/// POST /api/jobs/:id/retry: Return a dead-lettered or failed job to the queue.
async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state.broker.requeue(id).await?;
    tracing::info!(job_id = %job.id, key = %job.key, "Job requeued by operator");
    Ok(Json(job))
}
