//! Mail job handlers.

pub mod answer_question;
pub mod registration;

use std::fmt::Write;

use chrono::NaiveDate;
use lettre::Address;
use lettre::message::Mailbox;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use gympoint_queue::HandlerError;

use crate::format;

pub use answer_question::{AnswerQuestionMail, AnswerQuestionMailPayload};
pub use registration::{RegistrationMail, RegistrationMailPayload};

/// Mail recipient as carried in job payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Validated `Name <address>` header value. Display names with RFC 5322
    /// specials come out quoted.
    pub fn mailbox(&self) -> Result<String, HandlerError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(HandlerError::Validation("student name is empty".into()));
        }
        let address: Address = self.email.trim().parse().map_err(|e| {
            HandlerError::Validation(format!(
                "student email {:?} is not an address: {}",
                self.email, e
            ))
        })?;

        let mut header = String::new();
        write!(header, "{}", Mailbox::new(Some(name.to_string()), address)).map_err(|_| {
            HandlerError::Validation(format!("student name {:?} cannot be encoded", self.name))
        })?;
        Ok(header)
    }
}

/// Decode a job payload; a shape mismatch is a validation failure.
fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, HandlerError> {
    T::deserialize(payload).map_err(|e| HandlerError::Validation(e.to_string()))
}

fn long_date(field: &str, raw: &str) -> Result<String, HandlerError> {
    let date: NaiveDate = format::parse_date(raw)
        .ok_or_else(|| HandlerError::Validation(format!("{} {:?} is not a date", field, raw)))?;
    Ok(format::format_long_date(date))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_plain_name() {
        let recipient = Recipient::new("Ana", "ana@x.com");
        assert_eq!(recipient.mailbox().unwrap(), "Ana <ana@x.com>");
    }

    #[test]
    fn test_mailbox_quotes_names_with_specials() {
        for name in ["Silva, Ana", "Ana (Gold)", "Ana M. Silva", "João da Silva"] {
            let header = Recipient::new(name, "ana@x.com").mailbox().unwrap();
            let parsed: Mailbox = header.parse().unwrap();
            assert_eq!(parsed.name.as_deref(), Some(name), "{}", header);
            assert_eq!(parsed.email.to_string(), "ana@x.com");
        }
        assert_eq!(
            Recipient::new("Silva, Ana", "ana@x.com").mailbox().unwrap(),
            "\"Silva, Ana\" <ana@x.com>"
        );
    }

    #[test]
    fn test_mailbox_rejects_bad_recipients() {
        for (name, email) in [("", "ana@x.com"), ("Ana", "ana"), ("Ana\r\nBcc: x", "ana@x.com")] {
            let err = Recipient::new(name, email).mailbox().unwrap_err();
            assert!(matches!(err, HandlerError::Validation(_)), "{:?}", err);
        }
    }
}
