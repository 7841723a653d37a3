//! PostgreSQL-backed broker.
//!
//! Leasing selects the oldest eligible row with `FOR UPDATE SKIP LOCKED` and
//! flips it to `active` inside one transaction, so concurrent workers (in any
//! number of processes) never lease the same job. All timestamps come from the
//! database clock (`NOW()`), which keeps lease deadlines consistent across
//! hosts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use gympoint_common::error::QueueError;
use gympoint_common::types::{Job, Lease, NewJob};

use crate::broker::Broker;

const JOB_COLUMNS: &str = "id, key, payload, attempts, max_attempts, state, available_at, \
     created_at, leased_at, lease_token, lease_expires_at, last_error, completed_at";

/// Durable broker over the `jobs` table.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
    lease_timeout: Duration,
}

impl PgBroker {
    pub fn new(pool: PgPool, lease_timeout: Duration) -> Self {
        Self {
            pool,
            lease_timeout,
        }
    }

    fn lease_timeout_ms(&self) -> i64 {
        i64::try_from(self.lease_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    /// Distinguish a missing job from one whose lease moved on.
    async fn lease_error(&self, id: Uuid) -> QueueError {
        match self.find(id).await {
            Ok(Some(_)) => QueueError::LeaseLost(id),
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        let job: Job = sqlx::query_as(&format!(
            r#"
            INSERT INTO jobs (id, key, payload, state, attempts, max_attempts, available_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, NOW(), NOW())
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&job.key)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(job_id = %job.id, key = %job.key, "Job persisted");
        Ok(job)
    }

    async fn lease(&self) -> Result<Option<Lease>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE state = 'pending' AND available_at <= NOW()
            ORDER BY created_at ASC, seq ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let job: Job = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET state = 'active',
                leased_at = NOW(),
                lease_token = $2,
                lease_expires_at = NOW() + ($3::bigint * INTERVAL '1 millisecond')
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(token)
        .bind(self.lease_timeout_ms())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let expires_at: DateTime<Utc> = job.lease_expires_at.unwrap_or_else(Utc::now);
        tracing::debug!(job_id = %job.id, key = %job.key, attempts = job.attempts, "Job leased");

        Ok(Some(Lease {
            job,
            token,
            expires_at,
        }))
    }

    async fn acknowledge(&self, lease: &Lease) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', completed_at = NOW(), last_error = NULL,
                leased_at = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND state = 'active' AND lease_token = $2
            "#,
        )
        .bind(lease.job_id())
        .bind(lease.token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(lease.job_id()).await);
        }
        Ok(())
    }

    async fn release(
        &self,
        lease: &Lease,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = attempts + 1,
                available_at = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
                last_error = $4,
                leased_at = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND state = 'active' AND lease_token = $2
            "#,
        )
        .bind(lease.job_id())
        .bind(lease.token)
        .bind(delay_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(lease.job_id()).await);
        }
        Ok(())
    }

    async fn deadletter(
        &self,
        lease: &Lease,
        attempts: i32,
        reason: &str,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead_letter',
                attempts = $3,
                last_error = $4,
                leased_at = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND state = 'active' AND lease_token = $2
            "#,
        )
        .bind(lease.job_id())
        .bind(lease.token)
        .bind(attempts.max(0))
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_error(lease.job_id()).await);
        }
        Ok(())
    }

    async fn recover_expired(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                state = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                available_at = NOW(),
                last_error = 'lease expired before the job was resolved',
                leased_at = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE state = 'active' AND lease_expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let job = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        let jobs = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state IN ('dead_letter', 'failed')
            ORDER BY created_at DESC, seq DESC
            LIMIT $1
            "#
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn requeue(&self, id: Uuid) -> Result<Job, QueueError> {
        let job: Option<Job> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, available_at = NOW(),
                leased_at = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND state IN ('dead_letter', 'failed')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => match self.find(id).await? {
                Some(existing) => Err(QueueError::InvalidState {
                    id,
                    state: existing.state,
                }),
                None => Err(QueueError::NotFound(id)),
            },
        }
    }
}
