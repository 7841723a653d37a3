//! SMTP transport using lettre.
//!
//! One `AsyncSmtpTransport` is built at startup and shared by every worker.
//! Each send opens its own relay connection, so concurrent sends never share
//! session state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use gympoint_common::config::AppConfig;

use crate::error::MailError;
use crate::template::TemplateEngine;
use crate::transport::{MailTransport, OutgoingMail};

/// Relay connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// `none`, `starttls` or `tls`.
    pub tls: String,
    pub timeout: Duration,
    pub from: String,
}

impl From<&AppConfig> for SmtpSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            user: config.smtp_user.clone(),
            pass: config.smtp_pass.clone(),
            tls: config.smtp_tls.clone(),
            timeout: Duration::from_secs(config.smtp_timeout_secs),
            from: config.mail_from.clone(),
        }
    }
}

/// Renders templates and delivers them over SMTP.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    templates: Arc<TemplateEngine>,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings, templates: Arc<TemplateEngine>) -> Result<Self, MailError> {
        let from = parse_mailbox(&settings.from)?;
        let tls = tls_mode(&settings.tls, &settings.host)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            .port(settings.port)
            .timeout(Some(settings.timeout))
            .tls(tls);

        if let (Some(user), Some(pass)) = (&settings.user, &settings.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            tls = %settings.tls,
            "SMTP transport configured"
        );

        Ok(Self {
            transport: builder.build(),
            from,
            templates,
        })
    }

    pub fn from_config(config: &AppConfig, templates: Arc<TemplateEngine>) -> Result<Self, MailError> {
        Self::new(&SmtpSettings::from(config), templates)
    }

    fn build_message(&self, mail: &OutgoingMail, body: String) -> Result<Message, MailError> {
        Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&mail.to)?)
            .subject(&mail.subject)
            .singlepart(SinglePart::html(body))
            .map_err(|e| MailError::InvalidAddress(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let body = self.templates.render(&mail.template, &mail.context)?;
        let message = self.build_message(&mail, body)?;

        match self.transport.send(message).await {
            Ok(response) => {
                tracing::info!(
                    to = %mail.to,
                    template = %mail.template,
                    code = %response.code(),
                    "Mail sent"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(to = %mail.to, template = %mail.template, error = %e, "Mail send failed");
                Err(MailError::Transport(e.to_string()))
            }
        }
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, MailError> {
    raw.parse::<Mailbox>()
        .map_err(|e| MailError::InvalidAddress(format!("{}: {}", raw, e)))
}

fn tls_mode(mode: &str, host: &str) -> Result<Tls, MailError> {
    let parameters = || {
        TlsParameters::builder(host.to_string())
            .build()
            .map_err(|e| MailError::Transport(format!("TLS configuration error: {}", e)))
    };

    match mode {
        "none" => Ok(Tls::None),
        "starttls" => Ok(Tls::Opportunistic(parameters()?)),
        "tls" => Ok(Tls::Wrapper(parameters()?)),
        other => Err(MailError::Transport(format!(
            "Invalid TLS mode: {}. Must be 'none', 'starttls', or 'tls'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(tls: &str) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port: 2525,
            user: None,
            pass: None,
            tls: tls.into(),
            timeout: Duration::from_secs(1),
            from: "Equipe GymPoint <noreply@gympoint.com>".into(),
        }
    }

    #[test]
    fn test_parse_mailbox_display_form() {
        let mailbox = parse_mailbox("Ana <ana@x.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Ana"));
        assert_eq!(mailbox.email.to_string(), "ana@x.com");

        assert!(matches!(parse_mailbox("Ana <ana>"), Err(MailError::InvalidAddress(_))));
    }

    #[test]
    fn test_parse_mailbox_accepts_recipient_headers() {
        let header = crate::jobs::Recipient::new("Silva, Ana (Gold)", "ana@x.com")
            .mailbox()
            .unwrap();
        let mailbox = parse_mailbox(&header).unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Silva, Ana (Gold)"));
    }

    #[test]
    fn test_tls_modes() {
        assert!(matches!(tls_mode("none", "localhost"), Ok(Tls::None)));
        assert!(matches!(tls_mode("ssl", "localhost"), Err(MailError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unknown_template_fails_before_connecting() {
        let mailer = SmtpMailer::new(&settings("none"), Arc::new(TemplateEngine::new())).unwrap();
        let err = mailer
            .send(OutgoingMail {
                to: "Ana <ana@x.com>".into(),
                subject: "Matrícula cadastrada".into(),
                template: "registration".into(),
                context: serde_json::Map::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, MailError::UnknownTemplate("registration".into()));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut bad = settings("none");
        bad.from = "noreply".into();
        assert!(matches!(
            SmtpMailer::new(&bad, Arc::new(TemplateEngine::new())),
            Err(MailError::InvalidAddress(_))
        ));
    }
}
