use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Months, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use gympoint_queue::{HandlerError, JobHandler};

use super::{Recipient, decode, long_date};
use crate::format::format_price;
use crate::transport::{MailTransport, OutgoingMail};

pub const SUBJECT: &str = "Matrícula cadastrada";
pub const TEMPLATE: &str = "registration";

/// Plan fields carried in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

/// Plan as known to the registration request; used to derive the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTerms {
    pub title: String,
    /// Length of the plan in months.
    pub duration: u32,
    /// Monthly price.
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMailPayload {
    pub student: Recipient,
    pub plan: PlanSummary,
    pub start_date: String,
    pub end_date: String,
    /// Total price of the registration.
    pub price: f64,
}

impl RegistrationMailPayload {
    /// Payload for a new registration: the start is truncated to the hour,
    /// the end is `duration` months later and the price covers every month.
    pub fn for_plan(student: Recipient, plan: &PlanTerms, start: DateTime<Utc>) -> Self {
        let start = start.duration_trunc(TimeDelta::hours(1)).unwrap_or(start);
        let end = start
            .checked_add_months(Months::new(plan.duration))
            .unwrap_or(start);

        Self {
            student,
            plan: PlanSummary {
                title: plan.title.clone(),
                duration: Some(plan.duration),
            },
            start_date: start.to_rfc3339_opts(SecondsFormat::Millis, true),
            end_date: end.to_rfc3339_opts(SecondsFormat::Millis, true),
            price: plan.price * f64::from(plan.duration),
        }
    }

    fn context(&self) -> Result<Map<String, Value>, HandlerError> {
        if self.plan.title.trim().is_empty() {
            return Err(HandlerError::Validation("plan title is empty".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(HandlerError::Validation(format!("invalid price {}", self.price)));
        }

        let mut context = Map::new();
        context.insert("student".into(), self.student.name.clone().into());
        context.insert("plan".into(), self.plan.title.clone().into());
        context.insert("start_date".into(), long_date("start_date", &self.start_date)?.into());
        context.insert("end_date".into(), long_date("end_date", &self.end_date)?.into());
        context.insert("price".into(), format_price(self.price).into());
        Ok(context)
    }
}

/// Confirms a new membership to the student.
pub struct RegistrationMail {
    transport: Arc<dyn MailTransport>,
}

impl RegistrationMail {
    pub const KEY: &'static str = "RegistrationMail";

    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl JobHandler for RegistrationMail {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn handle(&self, payload: &Value) -> Result<(), HandlerError> {
        let payload: RegistrationMailPayload = decode(payload)?;
        let to = payload.student.mailbox()?;
        let context = payload.context()?;

        self.transport
            .send(OutgoingMail {
                to,
                subject: SUBJECT.to_string(),
                template: TEMPLATE.to_string(),
                context,
            })
            .await?;

        tracing::debug!(email = %payload.student.email, plan = %payload.plan.title, "Registration mail delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::memory::MemoryTransport;
    use chrono::TimeZone;
    use serde_json::json;

    fn scenario_payload() -> Value {
        json!({
            "student": { "name": "Ana", "email": "ana@x.com" },
            "plan": { "title": "Gold", "duration": 3 },
            "start_date": "2024-03-01",
            "end_date": "2024-06-01",
            "price": 270
        })
    }

    fn handler() -> (Arc<MemoryTransport>, RegistrationMail) {
        let transport = Arc::new(MemoryTransport::new());
        (transport.clone(), RegistrationMail::new(transport))
    }

    #[tokio::test]
    async fn test_renders_registration_context() {
        let (transport, handler) = handler();
        handler.handle(&scenario_payload()).await.unwrap();

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        let mail = &sent[0];
        assert_eq!(mail.to, "Ana <ana@x.com>");
        assert_eq!(mail.subject, "Matrícula cadastrada");
        assert_eq!(mail.template, "registration");
        assert_eq!(mail.context_str("student"), Some("Ana"));
        assert_eq!(mail.context_str("plan"), Some("Gold"));
        assert_eq!(mail.context_str("start_date"), Some("01 de março de 2024"));
        assert_eq!(mail.context_str("end_date"), Some("01 de junho de 2024"));
        assert_eq!(mail.context_str("price"), Some("R$270 reais"));
    }

    #[tokio::test]
    async fn test_missing_student_is_validation_failure() {
        let (transport, handler) = handler();
        let mut payload = scenario_payload();
        payload.as_object_mut().unwrap().remove("student");

        let err = handler.handle(&payload).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_date_is_validation_failure() {
        let (_transport, handler) = handler();
        let mut payload = scenario_payload();
        payload["end_date"] = json!("next month");

        let err = handler.handle(&payload).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(msg) if msg.contains("end_date")));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let (transport, handler) = handler();
        transport.fail_next(1);

        let err = handler.handle(&scenario_payload()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_template_is_fatal() {
        let transport = Arc::new(MemoryTransport::with_templates(Arc::new(
            crate::template::TemplateEngine::new(),
        )));
        let handler = RegistrationMail::new(transport);

        let err = handler.handle(&scenario_payload()).await.unwrap_err();
        assert_eq!(
            err,
            HandlerError::from(MailError::UnknownTemplate("registration".into()))
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_for_plan_derives_dates_and_total_price() {
        let plan = PlanTerms {
            title: "Gold".into(),
            duration: 3,
            price: 90.0,
        };
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 42, 17).unwrap();
        let payload = RegistrationMailPayload::for_plan(Recipient::new("Ana", "ana@x.com"), &plan, start);

        assert_eq!(payload.start_date, "2024-03-01T10:00:00.000Z");
        assert_eq!(payload.end_date, "2024-06-01T10:00:00.000Z");
        assert_eq!(payload.price, 270.0);
        assert_eq!(payload.plan.duration, Some(3));

        let context = payload.context().unwrap();
        assert_eq!(context["price"], "R$270 reais");
        assert_eq!(context["end_date"], "01 de junho de 2024");
    }
}
