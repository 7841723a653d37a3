use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MailError;

/// One templated mail, as handed from a job handler to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMail {
    /// Recipient in `Name <address>` form.
    pub to: String,
    pub subject: String,
    /// Template identifier, e.g. `registration`.
    pub template: String,
    /// Display-ready rendering context.
    pub context: Map<String, Value>,
}

impl OutgoingMail {
    /// Context value rendered as a plain string, for assertions and logs.
    pub fn context_str(&self, name: &str) -> Option<&str> {
        self.context.get(name).and_then(Value::as_str)
    }
}

/// Sends rendered mail. Shared by every worker, so implementations must be
/// safe for concurrent use.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}
