//! Transactional mail for the job queue.
//!
//! This crate provides:
//! - Handlebars template rendering (`TemplateEngine`)
//! - SMTP delivery with lettre (`SmtpMailer`) and an in-memory substitute
//! - The `RegistrationMail` and `AnswerQuestionMail` job handlers

pub mod error;
pub mod format;
pub mod jobs;
pub mod memory;
pub mod smtp;
pub mod template;
pub mod transport;

use std::sync::Arc;

use gympoint_queue::HandlerRegistry;

pub use error::MailError;
pub use jobs::{AnswerQuestionMail, RegistrationMail};
pub use memory::MemoryTransport;
pub use smtp::SmtpMailer;
pub use template::TemplateEngine;
pub use transport::{MailTransport, OutgoingMail};

/// Register every mail job handler against one shared transport.
pub fn register_mail_jobs(registry: &mut HandlerRegistry, transport: Arc<dyn MailTransport>) {
    registry.register_handler(RegistrationMail::new(transport.clone()));
    registry.register_handler(AnswerQuestionMail::new(transport));
}
