//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health: Liveness plus a round trip to the broker.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (status, broker) = match state.broker.find(Uuid::nil()).await {
        Ok(_) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the broker");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    };

    let overall = if status.is_success() { "ok" } else { "degraded" };
    let body = json!({
        "status": overall,
        "service": "gympoint-api",
        "version": env!("CARGO_PKG_VERSION"),
        "broker": broker,
    });
    (status, Json(body))
}
