use gympoint_queue::HandlerError;
use thiserror::Error;

/// Errors raised while rendering or delivering a mail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Template load failed: {0}")]
    Load(String),

    #[error("Template render failed: {0}")]
    Render(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Relay unreachable, authentication refused or a 4xx/5xx reply.
    #[error("SMTP send failed: {0}")]
    Transport(String),
}

impl From<MailError> for HandlerError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Transport(_) => HandlerError::Transport(err.to_string()),
            MailError::InvalidAddress(_) => HandlerError::Validation(err.to_string()),
            MailError::UnknownTemplate(_) | MailError::Load(_) | MailError::Render(_) => {
                HandlerError::Fatal(err.to_string())
            }
        }
    }
}
