//! Broker abstraction: the single serialization point of the queue.
//!
//! Implementations own jobs for their whole lifetime and hand out exclusive,
//! time-bounded leases. Lease atomicity must come from the store itself
//! (row locks, transactions), never from in-process locks held by callers.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use gympoint_common::error::QueueError;
use gympoint_common::types::{Job, Lease, NewJob};

/// Persistent, lease-capable job store.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Durably record a new job as `Pending` with `attempts = 0` and
    /// `available_at = now`. Returns once the write is acknowledged.
    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError>;

    /// Atomically lease the oldest eligible job (`Pending`, `available_at <= now`),
    /// moving it to `Active`. Returns `None` when nothing is eligible.
    async fn lease(&self) -> Result<Option<Lease>, QueueError>;

    /// Mark a leased job `Completed`.
    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Return a leased job to `Pending`, incrementing `attempts` and delaying
    /// its next lease by `delay`. `error` is recorded as the last failure.
    async fn release(
        &self,
        lease: &Lease,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError>;

    /// Move a leased job to the terminal `DeadLetter` state, recording
    /// `attempts` and the terminal `reason`.
    async fn deadletter(
        &self,
        lease: &Lease,
        attempts: i32,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Recover jobs whose lease expired without being resolved. Each recovered
    /// lease counts as an attempt; jobs with no attempts left become `Failed`.
    /// Returns the number of recovered jobs.
    async fn recover_expired(&self) -> Result<u64, QueueError>;

    /// Look up a job by id.
    async fn find(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Terminal failures (`DeadLetter` and `Failed`), newest first.
    async fn dead_letters(&self, limit: i64) -> Result<Vec<Job>, QueueError>;

    /// Put a `DeadLetter` or `Failed` job back in the queue with a fresh
    /// attempt budget. Any other state is rejected with `InvalidState`.
    async fn requeue(&self, id: Uuid) -> Result<Job, QueueError>;
}
