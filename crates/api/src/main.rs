//! GymPoint API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gympoint_common::config::AppConfig;
use gympoint_common::db;
use gympoint_queue::PgBroker;

use gympoint_api::routes::create_router;
use gympoint_api::state::AppState;

/// Job payloads are small JSON objects; anything larger is a client bug.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("gympoint_api=debug,gympoint_queue=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting GymPoint API server...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let broker = Arc::new(PgBroker::new(pool, config.lease_timeout()));
    let state = AppState::new(broker, config.job_max_attempts);

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping API server...");
        })
        .await?;

    Ok(())
}
