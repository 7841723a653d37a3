//! Producer API, the request path's only entry into the queue.
//!
//! `enqueue` returns once the broker has durably recorded the job, never once
//! the job has run. Failures are returned to the caller: a request whose
//! notification could not be recorded must fail loudly.

use std::sync::Arc;

use serde::Serialize;

use gympoint_common::error::QueueError;
use gympoint_common::types::{Job, NewJob};

use crate::broker::Broker;

/// Handle used by request handlers to enqueue jobs.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    default_max_attempts: i32,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, default_max_attempts: i32) -> Self {
        Self {
            broker,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    /// Enqueue a job with the configured default retry ceiling.
    pub async fn enqueue<P: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &P,
    ) -> Result<Job, QueueError> {
        self.enqueue_with(key, payload, self.default_max_attempts)
            .await
    }

    /// Enqueue a job with an explicit retry ceiling.
    ///
    /// The key and payload are validated before anything reaches the broker:
    /// an empty key, a payload that fails to serialize, or one that does not
    /// serialize to a JSON object is rejected without a write.
    pub async fn enqueue_with<P: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &P,
        max_attempts: i32,
    ) -> Result<Job, QueueError> {
        let job = Self::build(key, payload, max_attempts)?;

        let job = self.broker.enqueue(job).await.inspect_err(|e| {
            tracing::error!(key = %key, error = %e, "Failed to enqueue job");
        })?;

        tracing::info!(job_id = %job.id, key = %job.key, "Job enqueued");
        Ok(job)
    }

    fn build<P: Serialize + ?Sized>(
        key: &str,
        payload: &P,
        max_attempts: i32,
    ) -> Result<NewJob, QueueError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(QueueError::InvalidKey);
        }
        if max_attempts < 1 {
            return Err(QueueError::InvalidPayload(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }

        let payload = serde_json::to_value(payload)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        if !payload.is_object() {
            return Err(QueueError::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        }

        Ok(NewJob {
            key: key.to_string(),
            payload,
            max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use gympoint_common::types::JobState;
    use serde::ser::Error as _;
    use std::time::Duration;

    /// Stands in for a payload holding a live resource handle.
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("socket handles cannot be serialized"))
        }
    }

    fn producer() -> (Arc<MemoryBroker>, Producer) {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let producer = Producer::new(broker.clone(), 3);
        (broker, producer)
    }

    #[tokio::test]
    async fn test_enqueue_records_pending_job() {
        let (broker, producer) = producer();
        let job = producer
            .enqueue("RegistrationMail", &serde_json::json!({"price": 270}))
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.available_at <= chrono::Utc::now());

        let stored = broker.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.payload["price"], 270);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (broker, producer) = producer();
        let err = producer.enqueue("  ", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidKey));
        assert_eq!(broker.len().await, 0);
    }

    #[tokio::test]
    async fn test_unserializable_payload_fails_before_write() {
        let (broker, producer) = producer();
        let err = producer
            .enqueue("RegistrationMail", &Unserializable)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
        assert_eq!(broker.len().await, 0);
    }

    #[tokio::test]
    async fn test_non_object_payload_rejected() {
        let (broker, producer) = producer();
        let err = producer.enqueue("RegistrationMail", &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
        assert_eq!(broker.len().await, 0);
    }

    #[tokio::test]
    async fn test_broker_unavailable_is_surfaced() {
        let (broker, producer) = producer();
        broker.set_unavailable(true).await;

        let err = producer
            .enqueue("AnswerQuestionMail", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::BrokerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_enqueue_with_explicit_ceiling() {
        let (_broker, producer) = producer();
        let job = producer
            .enqueue_with("RegistrationMail", &serde_json::json!({}), 7)
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 7);

        let err = producer
            .enqueue_with("RegistrationMail", &serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
    }
}
