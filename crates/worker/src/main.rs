use std::sync::Arc;

use gympoint_common::config::AppConfig;
use gympoint_common::db;
use gympoint_mailer::{MailTransport, SmtpMailer, TemplateEngine, register_mail_jobs};
use gympoint_queue::{Broker, HandlerRegistry, PgBroker};
use gympoint_worker::{WorkerPool, WorkerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gympoint_worker=info,gympoint_queue=info,gympoint_mailer=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("GymPoint job worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let broker: Arc<dyn Broker> = Arc::new(PgBroker::new(pool, config.lease_timeout()));

    let templates = Arc::new(TemplateEngine::from_dir(&config.mail_template_dir)?);
    let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::from_config(&config, templates)?);

    // Handlers are bound once here; the registry is read-only from now on.
    let mut registry = HandlerRegistry::new();
    register_mail_jobs(&mut registry, mailer);

    let mut workers = WorkerPool::new(
        broker,
        Arc::new(registry),
        WorkerSettings::from_config(&config),
        config.worker_count,
        config.lease_timeout(),
    );
    workers.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, draining in-flight jobs...");

    workers.shutdown_graceful(config.shutdown_timeout()).await?;

    tracing::info!("GymPoint job worker stopped.");
    Ok(())
}
