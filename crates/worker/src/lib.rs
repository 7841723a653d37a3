pub mod error;
pub mod pool;
pub mod worker;

pub use error::WorkerError;
pub use pool::WorkerPool;
pub use worker::{Outcome, Worker, WorkerSettings};
