use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// `Pending` jobs are eligible for lease once `available_at` has passed.
/// `Active` jobs are leased to exactly one worker. `Completed`, `Failed` and
/// `DeadLetter` are terminal: `DeadLetter` records a handler-reported terminal
/// error, `Failed` records a job whose leases kept expiring until its attempts
/// ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    DeadLetter,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::DeadLetter
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// A durable unit of deferred work, as persisted by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    /// Job-type key; resolves to a registered handler at dequeue time.
    pub key: String,
    /// Key-specific JSON object handed to the handler.
    pub payload: serde_json::Value,
    /// Number of execution attempts recorded so far.
    pub attempts: i32,
    pub max_attempts: i32,
    pub state: JobState,
    /// The job must not be leased before this instant.
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    /// Token of the lease currently held on the job, if any.
    #[serde(skip_serializing)]
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Error message of the latest failed attempt.
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A job as submitted by the producer, before the broker persists it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub key: String,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
}

/// Exclusive, time-bounded ownership of a job by one worker execution.
///
/// Every broker transition out of `Active` takes the lease and is rejected
/// once the token no longer matches the stored one.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: Job,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn job_id(&self) -> Uuid {
        self.job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_display_matches_serde() {
        for state in [
            JobState::Pending,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::DeadLetter,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json.as_str().unwrap(), state.to_string());
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::DeadLetter.is_terminal());
    }

    #[test]
    fn test_lease_token_is_not_serialized() {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            key: "RegistrationMail".to_string(),
            payload: serde_json::json!({}),
            attempts: 0,
            max_attempts: 3,
            state: JobState::Active,
            available_at: now,
            created_at: now,
            leased_at: Some(now),
            lease_token: Some(Uuid::new_v4()),
            lease_expires_at: Some(now),
            last_error: None,
            completed_at: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("lease_token").is_none());
        assert_eq!(json["state"], "active");
    }
}
