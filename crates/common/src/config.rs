use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string (the job broker's durable store)
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP API listens on (default: 3333)
    pub api_port: u16,

    /// SMTP relay host
    pub smtp_host: String,

    /// SMTP relay port (default: 587)
    pub smtp_port: u16,

    /// SMTP username, if the relay requires authentication
    pub smtp_user: Option<String>,

    /// SMTP password, if the relay requires authentication
    pub smtp_pass: Option<String>,

    /// TLS mode for the relay: `none`, `starttls` or `tls`
    pub smtp_tls: String,

    /// SMTP command timeout in seconds (default: 10)
    pub smtp_timeout_secs: u64,

    /// Sender mailbox, in `Name <address>` form
    pub mail_from: String,

    /// Directory holding the Handlebars email templates
    pub mail_template_dir: String,

    /// Number of concurrent workers per worker process (default: 4)
    pub worker_count: usize,

    /// How long an idle worker waits before polling the broker again
    pub worker_poll_interval_ms: u64,

    /// Default retry ceiling stamped on newly enqueued jobs (default: 5)
    pub job_max_attempts: i32,

    /// Initial retry delay; doubles after every failed attempt
    pub job_backoff_base_ms: u64,

    /// Upper bound for the retry delay
    pub job_backoff_cap_ms: u64,

    /// Lease duration; an unresolved lease older than this is recovered
    pub job_lease_timeout_secs: u64,

    /// Maximum time to wait for in-flight jobs on shutdown
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_var("API_PORT", 3333)?,
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: parse_var("SMTP_PORT", 587)?,
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_pass: std::env::var("SMTP_PASS").ok(),
            smtp_tls: std::env::var("SMTP_TLS").unwrap_or_else(|_| "starttls".to_string()),
            smtp_timeout_secs: parse_var("SMTP_TIMEOUT_SECS", 10)?,
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "Equipe GymPoint <noreply@gympoint.com>".to_string()),
            mail_template_dir: std::env::var("MAIL_TEMPLATE_DIR")
                .unwrap_or_else(|_| "templates/emails".to_string()),
            worker_count: parse_var("WORKER_COUNT", 4)?,
            worker_poll_interval_ms: parse_var("WORKER_POLL_INTERVAL_MS", 1000)?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", 5)?,
            job_backoff_base_ms: parse_var("JOB_BACKOFF_BASE_MS", 1000)?,
            job_backoff_cap_ms: parse_var("JOB_BACKOFF_CAP_MS", 300_000)?,
            job_lease_timeout_secs: parse_var("JOB_LEASE_TIMEOUT_SECS", 60)?,
            shutdown_timeout_secs: parse_var("SHUTDOWN_TIMEOUT_SECS", 30)?,
        };

        if config.job_max_attempts < 1 {
            anyhow::bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }
        if config.job_lease_timeout_secs == 0 {
            anyhow::bail!("JOB_LEASE_TIMEOUT_SECS must be greater than zero");
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.job_backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.job_backoff_cap_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.job_lease_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Read an optional variable, falling back to `default` when unset.
/// A set-but-malformed value is an error rather than a silent default.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}
