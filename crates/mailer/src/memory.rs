//! In-memory transport for tests and local runs without a relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::MailError;
use crate::template::TemplateEngine;
use crate::transport::{MailTransport, OutgoingMail};

/// Records every delivered mail instead of talking SMTP.
///
/// `fail_next(n)` makes the next `n` sends fail with `MailError::Transport`,
/// which simulates a relay that is briefly down.
#[derive(Default)]
pub struct MemoryTransport {
    templates: Option<Arc<TemplateEngine>>,
    sent: Mutex<Vec<(OutgoingMail, Option<String>)>>,
    pending_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render each mail through `templates` before recording it, so unknown
    /// templates and incomplete contexts fail the way they would over SMTP.
    pub fn with_templates(templates: Arc<TemplateEngine>) -> Self {
        Self {
            templates: Some(templates),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Number of `send` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Mails delivered so far, oldest first.
    pub async fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().await.iter().map(|(mail, _)| mail.clone()).collect()
    }

    /// Rendered bodies of delivered mails. `None` when no engine is attached.
    pub async fn bodies(&self) -> Vec<Option<String>> {
        self.sent.lock().await.iter().map(|(_, body)| body.clone()).collect()
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let body = match &self.templates {
            Some(engine) => Some(engine.render(&mail.template, &mail.context)?),
            None => None,
        };

        if self.take_failure() {
            return Err(MailError::Transport(format!(
                "simulated relay failure sending to {}",
                mail.to
            )));
        }

        tracing::debug!(to = %mail.to, template = %mail.template, "Mail recorded");
        self.sent.lock().await.push((mail, body));
        Ok(())
    }
}
