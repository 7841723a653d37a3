use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the worker pool lifecycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic { worker_id: usize, error: String },

    #[error("shutdown did not finish within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },
}
