//! In-memory broker for tests and single-process development.
//!
//! Jobs live in a map ordered by insertion sequence, which gives the same FIFO
//! order as the Postgres broker's `(created_at, seq)` scan. The mutex is this
//! broker's own serialization primitive; nothing is durable across restarts.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use gympoint_common::error::QueueError;
use gympoint_common::types::{Job, JobState, Lease, NewJob};

use crate::broker::Broker;

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<u64, Job>,
    index: HashMap<Uuid, u64>,
    next_seq: u64,
    unavailable: bool,
}

impl Inner {
    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable {
            return Err(QueueError::BrokerUnavailable(
                "memory broker marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        let seq = self.index.get(&id)?;
        self.jobs.get_mut(seq)
    }

    /// The job behind `lease`, if the lease is still the one held on it.
    fn leased_mut(&mut self, lease: &Lease) -> Result<&mut Job, QueueError> {
        let id = lease.job_id();
        match self.get_mut(id) {
            Some(job) if job.state == JobState::Active && job.lease_token == Some(lease.token) => {
                Ok(job)
            }
            Some(_) => Err(QueueError::LeaseLost(id)),
            None => Err(QueueError::NotFound(id)),
        }
    }
}

fn clear_lease(job: &mut Job) {
    job.leased_at = None;
    job.lease_token = None;
    job.lease_expires_at = None;
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Broker holding jobs in process memory.
pub struct MemoryBroker {
    lease_timeout: Duration,
    inner: Mutex<Inner>,
}

impl MemoryBroker {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            lease_timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make every operation fail with `BrokerUnavailable` until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// Number of stored jobs, in any state.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every stored job in FIFO order.
    pub async fn jobs(&self) -> Vec<Job> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            key: job.key,
            payload: job.payload,
            attempts: 0,
            max_attempts: job.max_attempts,
            state: JobState::Pending,
            available_at: now,
            created_at: now,
            leased_at: None,
            lease_token: None,
            lease_expires_at: None,
            last_error: None,
            completed_at: None,
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.index.insert(job.id, seq);
        inner.jobs.insert(seq, job.clone());
        Ok(job)
    }

    async fn lease(&self) -> Result<Option<Lease>, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let now = Utc::now();
        let Some(job) = inner
            .jobs
            .values_mut()
            .find(|job| job.state == JobState::Pending && job.available_at <= now)
        else {
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let expires_at = after(now, self.lease_timeout);
        job.state = JobState::Active;
        job.leased_at = Some(now);
        job.lease_token = Some(token);
        job.lease_expires_at = Some(expires_at);

        Ok(Some(Lease {
            job: job.clone(),
            token,
            expires_at,
        }))
    }

    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let job = inner.leased_mut(lease)?;
        job.state = JobState::Completed;
        job.completed_at = Some(Utc::now());
        job.last_error = None;
        clear_lease(job);
        Ok(())
    }

    async fn release(
        &self,
        lease: &Lease,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let job = inner.leased_mut(lease)?;
        job.state = JobState::Pending;
        job.attempts += 1;
        job.available_at = after(Utc::now(), delay);
        job.last_error = Some(error.to_string());
        clear_lease(job);
        Ok(())
    }

    async fn deadletter(
        &self,
        lease: &Lease,
        attempts: i32,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let job = inner.leased_mut(lease)?;
        job.state = JobState::DeadLetter;
        job.attempts = attempts.max(0);
        job.last_error = Some(reason.to_string());
        clear_lease(job);
        Ok(())
    }

    async fn recover_expired(&self) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let now = Utc::now();
        let mut recovered = 0;
        for job in inner.jobs.values_mut() {
            let expired = job.state == JobState::Active
                && job.lease_expires_at.is_some_and(|deadline| deadline <= now);
            if !expired {
                continue;
            }

            job.attempts += 1;
            job.state = if job.attempts >= job.max_attempts {
                JobState::Failed
            } else {
                JobState::Pending
            };
            job.available_at = now;
            job.last_error = Some("lease expired before the job was resolved".to_string());
            clear_lease(job);
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.get_mut(id).cloned())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        let inner = self.inner.lock().await;
        inner.check_available()?;

        Ok(inner
            .jobs
            .values()
            .rev()
            .filter(|job| matches!(job.state, JobState::DeadLetter | JobState::Failed))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: Uuid) -> Result<Job, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let job = inner.get_mut(id).ok_or(QueueError::NotFound(id))?;
        if !matches!(job.state, JobState::DeadLetter | JobState::Failed) {
            return Err(QueueError::InvalidState {
                id,
                state: job.state,
            });
        }

        job.state = JobState::Pending;
        job.attempts = 0;
        job.available_at = Utc::now();
        clear_lease(job);
        Ok(job.clone())
    }
}
