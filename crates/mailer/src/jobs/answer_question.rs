use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use gympoint_queue::{HandlerError, JobHandler};

use super::{Recipient, decode, long_date};
use crate::transport::{MailTransport, OutgoingMail};

pub const SUBJECT: &str = "Pedido de auxílio respondido";
pub const TEMPLATE: &str = "answer_question";

/// Help order as stored once a tutor has answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnsweredHelpOrder {
    pub question: String,
    pub answer: String,
    #[serde(alias = "answerAt")]
    pub answer_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerQuestionMailPayload {
    pub student: Recipient,
    pub help_order: AnsweredHelpOrder,
}

impl AnswerQuestionMailPayload {
    fn context(&self) -> Result<Map<String, Value>, HandlerError> {
        let order = &self.help_order;
        if order.answer.trim().is_empty() {
            return Err(HandlerError::Validation("help order has no answer".into()));
        }

        let mut context = Map::new();
        context.insert("student".into(), self.student.name.clone().into());
        context.insert("question".into(), order.question.clone().into());
        context.insert("answer".into(), order.answer.clone().into());
        context.insert("answer_at".into(), long_date("answer_at", &order.answer_at)?.into());
        Ok(context)
    }
}

/// Tells a student their help order was answered.
pub struct AnswerQuestionMail {
    transport: Arc<dyn MailTransport>,
}

impl AnswerQuestionMail {
    pub const KEY: &'static str = "AnswerQuestionMail";

    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl JobHandler for AnswerQuestionMail {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    async fn handle(&self, payload: &Value) -> Result<(), HandlerError> {
        let payload: AnswerQuestionMailPayload = decode(payload)?;
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn handler() -> (Arc<MemoryTransport>, AnswerQuestionMail) {
        let transport = Arc::new(MemoryTransport::new());
        (transport.clone(), AnswerQuestionMail::new(transport))
    }

    #[tokio::test]
    async fn test_renders_answer_context() {
        let (transport, handler) = handler();
        // Stored help orders carry extra fields; only the answered ones matter.
        let payload = json!({
            "student": { "name": "Bruno", "email": "bruno@x.com" },
            "help_order": {
                "_id": "65f1c2",
                "student_id": 7,
                "question": "Posso treinar de jejum?",
                "answer": "Sim, com acompanhamento.",
                "answerAt": "2024-03-12T14:30:00.000Z"
            }
        });

        handler.handle(&payload).await.unwrap();

        let sent = transport.sent().await;
        let mail = &sent[0];
        assert_eq!(mail.to, "Bruno <bruno@x.com>");
        assert_eq!(mail.subject, "Pedido de auxílio respondido");
        assert_eq!(mail.template, "answer_question");
        assert_eq!(mail.context_str("question"), Some("Posso treinar de jejum?"));
        assert_eq!(mail.context_str("answer"), Some("Sim, com acompanhamento."));
        assert_eq!(mail.context_str("answer_at"), Some("12 de março de 2024"));
    }

    #[tokio::test]
    async fn test_unanswered_order_is_validation_failure() {
        let (transport, handler) = handler();
        let payload = json!({
            "student": { "name": "Bruno", "email": "bruno@x.com" },
            "help_order": { "question": "Posso treinar de jejum?", "answer": null, "answer_at": null }
        });

        let err = handler.handle(&payload).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_email_is_validation_failure() {
        let (_transport, handler) = handler();
        let payload = json!({
            "student": { "name": "Bruno", "email": "bruno" },
            "help_order": {
                "question": "Q",
                "answer": "A",
                "answer_at": "2024-03-12"
            }
        });

        let err = handler.handle(&payload).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
    }
}
