//! Worker pool management with structured concurrency.
//!
//! Owns the worker tasks and the lease reaper, and drains them on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gympoint_queue::{Broker, HandlerRegistry};

use crate::error::WorkerError;
use crate::worker::{Worker, WorkerSettings};

const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    worker_count: usize,
    reap_interval: Duration,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    reaper_handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// The reaper runs every half lease timeout, and never more often than
    /// once a second.
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        settings: WorkerSettings,
        worker_count: usize,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            registry,
            settings,
            worker_count: worker_count.max(1),
            reap_interval: (lease_timeout / 2).max(MIN_REAP_INTERVAL),
            cancellation_token: CancellationToken::new(),
            worker_handles: Vec::new(),
            reaper_handle: None,
        }
    }

    /// Override the reaper period.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Spawn the workers and the reaper. Returns immediately.
    pub fn start(&mut self) {
        info!(
            worker_count = self.worker_count,
            handlers = ?self.registry.keys(),
            "Spawning job workers"
        );

        for worker_id in 0..self.worker_count {
            let worker = Worker::new(
                worker_id,
                self.broker.clone(),
                self.registry.clone(),
                self.settings,
            );
            let token = self.cancellation_token.clone();
            self.worker_handles
                .push(tokio::spawn(async move { worker.run(token).await }));
        }

        let broker = self.broker.clone();
        let token = self.cancellation_token.clone();
        let interval = self.reap_interval;
        self.reaper_handle = Some(tokio::spawn(async move {
            reap_expired_leases(broker, interval, token).await
        }));
    }

    /// Stop leasing, then wait for in-flight executions to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the timeout is exceeded or a worker panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<(), WorkerError> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "Initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let reaper = self.reaper_handle.take();

        let shutdown_future = async move {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "Worker task panicked during shutdown");
                    first_panic.get_or_insert(WorkerError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }
            if let Some(reaper) = reaper {
                if let Err(join_error) = reaper.await {
                    warn!(error = %join_error, "Lease reaper ended abnormally");
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("Worker pool shutdown completed");
                Ok(())
            }
            Ok(Some(panic)) => Err(panic),
            Err(_) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "Worker shutdown timed out; unresolved leases will be recovered after expiry"
                );
                Err(WorkerError::ShutdownTimeout { timeout })
            }
        }
    }

    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() && self.has_active_workers() {
            warn!("WorkerPool dropped without shutdown_graceful(); cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}

/// Periodically return expired leases to the broker until cancelled.
async fn reap_expired_leases(
    broker: Arc<dyn Broker>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match broker.recover_expired().await {
            Ok(0) => {}
            Ok(recovered) => warn!(recovered, "Recovered jobs with expired leases"),
            Err(e) => error!(error = %e, "Lease recovery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reap_interval_is_half_lease_with_floor() {
        let broker: Arc<dyn Broker> =
            Arc::new(gympoint_queue::MemoryBroker::new(Duration::from_secs(60)));
        let registry = Arc::new(HandlerRegistry::new());

        let pool = WorkerPool::new(
            broker.clone(),
            registry.clone(),
            WorkerSettings::default(),
            2,
            Duration::from_secs(60),
        );
        assert_eq!(pool.reap_interval, Duration::from_secs(30));

        let pool = WorkerPool::new(
            broker,
            registry,
            WorkerSettings::default(),
            0,
            Duration::from_millis(500),
        );
        assert_eq!(pool.reap_interval, MIN_REAP_INTERVAL);
        assert_eq!(pool.worker_count, 1);
    }
}
