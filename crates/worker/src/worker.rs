//! Consumer loop: lease, resolve, execute, then acknowledge, release or
//! dead-letter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use gympoint_common::config::AppConfig;
use gympoint_common::error::QueueError;
use gympoint_common::types::Lease;
use gympoint_queue::{Broker, HandlerError, HandlerRegistry, JobHandler, RetryPolicy};

/// Share of the lease reserved for resolving a job once its handler stopped.
const LEASE_MARGIN_DIVISOR: u32 = 5;

/// Tunables shared by every worker in a pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Idle wait between lease attempts when the broker has nothing eligible.
    pub poll_interval: Duration,
    /// Upper bound for one handler execution, counted from the lease request.
    pub execution_timeout: Duration,
    /// Tail of every lease a handler may never run into. Executions are also
    /// cut at `expires_at - lease_margin`, whatever `execution_timeout` says.
    pub lease_margin: Duration,
    pub retry: RetryPolicy,
}

impl WorkerSettings {
    /// Settings for a broker leasing for `lease_timeout`: handlers get four
    /// fifths of the lease, the rest is left for acknowledging or releasing.
    pub fn for_lease(lease_timeout: Duration) -> Self {
        let lease_margin = lease_timeout / LEASE_MARGIN_DIVISOR;
        Self {
            poll_interval: Duration::from_secs(1),
            execution_timeout: lease_timeout.saturating_sub(lease_margin),
            lease_margin,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry: RetryPolicy::new(config.backoff_base(), config.backoff_cap()),
            ..Self::for_lease(config.lease_timeout())
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::for_lease(Duration::from_secs(60))
    }
}

/// How one leased attempt was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Released back to the broker; eligible again after `delay`.
    RetryScheduled { attempts: i32, delay: Duration },
    /// Moved to the dead-letter state with `attempts` recorded.
    DeadLettered { attempts: i32, reason: String },
}

pub struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            broker,
            registry,
            settings,
        }
    }

    /// Lease and resolve at most one job. `Ok(None)` means nothing was
    /// eligible.
    pub async fn process_next(&self) -> Result<Option<Outcome>, QueueError> {
        let requested = Instant::now();
        let Some(lease) = self.broker.lease().await? else {
            return Ok(None);
        };
        let job = &lease.job;

        let handler = match self.registry.resolve(&job.key) {
            Ok(handler) => handler,
            Err(e) => {
                // A deploy without the handler, not a data problem.
                tracing::error!(
                    worker_id = self.id,
                    job_id = %job.id,
                    key = %job.key,
                    "No handler registered for job key"
                );
                return self
                    .deadletter(&lease, job.attempts, &e.to_string())
                    .await
                    .map(Some);
            }
        };

        tracing::debug!(
            worker_id = self.id,
            job_id = %job.id,
            key = %job.key,
            attempt = job.attempts + 1,
            "Executing job"
        );

        let outcome = match self.execute(handler, &lease, requested).await {
            Ok(()) => {
                self.broker.acknowledge(&lease).await?;
                tracing::info!(
                    worker_id = self.id,
                    job_id = %job.id,
                    key = %job.key,
                    "Job completed"
                );
                Outcome::Completed
            }
            Err(e) if e.is_retryable() => {
                let attempts = job.attempts + 1;
                if attempts < job.max_attempts {
                    let delay = self.settings.retry.delay_for(job.attempts);
                    self.broker.release(&lease, delay, &e.to_string()).await?;
                    tracing::warn!(
                        worker_id = self.id,
                        job_id = %job.id,
                        key = %job.key,
                        attempts,
                        max_attempts = job.max_attempts,
                        delay_ms = millis(delay),
                        error = %e,
                        "Job failed, retry scheduled"
                    );
                    Outcome::RetryScheduled { attempts, delay }
                } else {
                    self.deadletter(&lease, attempts, &e.to_string()).await?
                }
            }
            Err(e) => self.deadletter(&lease, job.attempts, &e.to_string()).await?,
        };

        Ok(Some(outcome))
    }

    /// Run the handler on its own task so a panic or an overrun cannot take
    /// the worker loop down with it. An overrunning handler is aborted and
    /// awaited, so it has stopped before the lease is resolved.
    async fn execute(
        &self,
        handler: Arc<dyn JobHandler>,
        lease: &Lease,
        requested: Instant,
    ) -> Result<(), HandlerError> {
        let limit = self.execution_limit(lease, requested);
        if limit.is_zero() {
            return Err(HandlerError::Timeout(limit));
        }

        let payload = lease.job.payload.clone();
        let mut task = tokio::spawn(async move { handler.handle(&payload).await });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(HandlerError::Fatal(format!(
                "handler panicked: {}",
                join_error
            ))),
            Err(_) => {
                task.abort();
                let _ = task.await;
                Err(HandlerError::Timeout(limit))
            }
        }
    }

    /// Time the handler may run: the configured timeout, counted from the
    /// lease request, and never past `expires_at - lease_margin`.
    fn execution_limit(&self, lease: &Lease, requested: Instant) -> Duration {
        let budget = self
            .settings
            .execution_timeout
            .saturating_sub(requested.elapsed());
        let remaining = (lease.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_sub(self.settings.lease_margin);
        budget.min(remaining)
    }

    async fn deadletter(
        &self,
        lease: &Lease,
        attempts: i32,
        reason: &str,
    ) -> Result<Outcome, QueueError> {
        self.broker.deadletter(lease, attempts, reason).await?;
        tracing::warn!(
            worker_id = self.id,
            job_id = %lease.job.id,
            key = %lease.job.key,
            attempts,
            reason,
            "Job dead-lettered"
        );
        Ok(Outcome::DeadLettered {
            attempts,
            reason: reason.to_string(),
        })
    }

    /// Process jobs until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between jobs: an in-flight execution runs
    /// to completion or to its timeout. Broker failures never end the loop;
    /// the worker backs off exponentially and tries again.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker_id = self.id, "Worker started");
        let mut broker_failures: i32 = 0;

        while !shutdown.is_cancelled() {
            let wait = match self.process_next().await {
                Ok(Some(_)) => {
                    broker_failures = 0;
                    continue;
                }
                Ok(None) => {
                    broker_failures = 0;
                    self.settings.poll_interval
                }
                Err(QueueError::LeaseLost(job_id)) => {
                    tracing::warn!(
                        worker_id = self.id,
                        job_id = %job_id,
                        "Lease expired before the job was resolved"
                    );
                    continue;
                }
                Err(e) => {
                    let delay = self.settings.retry.delay_for(broker_failures);
                    broker_failures = broker_failures.saturating_add(1);
                    tracing::error!(
                        worker_id = self.id,
                        error = %e,
                        retry_in_ms = millis(delay),
                        "Broker error"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(worker_id = self.id, "Worker stopped");
    }
}

/// Whole milliseconds for log fields, saturating.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gympoint_common::types::{JobState, NewJob};
    use gympoint_queue::MemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: AtomicUsize,
        error: HandlerError,
    }

    #[async_trait::async_trait]
    impl JobHandler for Flaky {
        fn key(&self) -> &'static str {
            "Flaky"
        }

        async fn handle(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl JobHandler for Slow {
        fn key(&self) -> &'static str {
            "Slow"
        }

        async fn handle(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait::async_trait]
    impl JobHandler for Panics {
        fn key(&self) -> &'static str {
            "Panics"
        }

        async fn handle(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
            panic!("template engine poisoned");
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(5),
            execution_timeout: Duration::from_millis(100),
            lease_margin: Duration::from_millis(10),
            retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    async fn worker_with(
        handler: impl JobHandler + 'static,
        key: &str,
        max_attempts: i32,
    ) -> (Arc<MemoryBroker>, Worker) {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        broker
            .enqueue(NewJob {
                key: key.to_string(),
                payload: serde_json::json!({}),
                max_attempts,
            })
            .await
            .unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register_handler(handler);
        let worker = Worker::new(0, broker.clone(), Arc::new(registry), settings());
        (broker, worker)
    }

    #[tokio::test]
    async fn test_empty_broker_yields_none() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let worker = Worker::new(0, broker, Arc::new(HandlerRegistry::new()), settings());
        assert_eq!(worker.process_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_validation_failure_deadletters_without_retry() {
        let handler = Flaky {
            failures: AtomicUsize::new(1),
            error: HandlerError::Validation("missing student".into()),
        };
        let (broker, worker) = worker_with(handler, "Flaky", 5).await;

        let outcome = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::DeadLettered { attempts: 0, .. }));
        assert_eq!(broker.jobs().await[0].state, JobState::DeadLetter);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let (broker, worker) = worker_with(Slow, "Slow", 2).await;

        let outcome = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::RetryScheduled { attempts: 1, .. }));
        let job = &broker.jobs().await[0];
        assert_eq!(job.state, JobState::Pending);
        assert!(job.last_error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_for_lease_keeps_a_margin() {
        let settings = WorkerSettings::for_lease(Duration::from_secs(60));
        assert_eq!(settings.lease_margin, Duration::from_secs(12));
        assert_eq!(settings.execution_timeout, Duration::from_secs(48));
        assert!(settings.execution_timeout + settings.lease_margin <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_execution_limit_stops_short_of_lease_expiry() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_millis(100)));
        broker
            .enqueue(NewJob {
                key: "Slow".to_string(),
                payload: serde_json::json!({}),
                max_attempts: 3,
            })
            .await
            .unwrap();
        let settings = WorkerSettings {
            execution_timeout: Duration::from_secs(10),
            lease_margin: Duration::from_millis(20),
            ..settings()
        };
        let worker = Worker::new(0, broker.clone(), Arc::new(HandlerRegistry::new()), settings);

        let lease = broker.lease().await.unwrap().unwrap();
        let limit = worker.execution_limit(&lease, Instant::now());
        assert!(limit <= Duration::from_millis(80), "{:?}", limit);

        let mut expired = lease.clone();
        expired.expires_at = Utc::now();
        assert_eq!(worker.execution_limit(&expired, Instant::now()), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_deadlettered() {
        let (broker, worker) = worker_with(Panics, "Panics", 3).await;

        let outcome = worker.process_next().await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::DeadLettered { attempts: 0, .. }));
        assert_eq!(broker.jobs().await[0].state, JobState::DeadLetter);
    }

    #[tokio::test]
    async fn test_broker_outage_does_not_stop_worker() {
        let handler = Flaky {
            failures: AtomicUsize::new(0),
            error: HandlerError::Transport("unused".into()),
        };
        let (broker, worker) = worker_with(handler, "Flaky", 3).await;
        broker.set_unavailable(true).await;

        let shutdown = CancellationToken::new();
        let worker = Arc::new(worker);
        let running = tokio::spawn({
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!running.is_finished());
        broker.set_unavailable(false).await;

        for _ in 0..100 {
            if broker.jobs().await[0].state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.jobs().await[0].state, JobState::Completed);

        shutdown.cancel();
        running.await.unwrap();
    }
}
