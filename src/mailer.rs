//! Templated email.
//!
//! Rendering is pure so templates can be tested; delivery goes through the
//! [`Mailer`] trait and always runs from the job queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{clients::cents_to_decimal, error::AppError};

/// Message templates the platform sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Template {
    Welcome {
        first_name: String,
    },
    /// Roster-created account; the link sets the first password.
    EmployeeInvite {
        first_name: String,
        employer_name: String,
        claim_url: String,
    },
    PasswordReset {
        first_name: String,
        reset_url: String,
    },
    TransferUpdate {
        first_name: String,
        amount_cents: i64,
        direction: String,
        status: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn render(&self, from: &str, to: &str) -> Email {
        let (subject, body) = match self {
            Template::Welcome { first_name } => (
                "Welcome to Ownerific".to_string(),
                format!(
                    "Hi {first_name},\n\nYour Ownerific account is ready. Link a bank account \
                     to start saving toward your first home.\n"
                ),
            ),
            Template::EmployeeInvite {
                first_name,
                employer_name,
                claim_url,
            } => (
                format!("{employer_name} added you to Ownerific"),
                format!(
                    "Hi {first_name},\n\n{employer_name} now offers Ownerific as a homebuying \
                     benefit. Choose a password to claim your account and see the credit \
                     waiting in your wallet:\n\n{claim_url}\n\nThis link works once and \
                     expires in 14 days.\n"
                ),
            ),
            Template::PasswordReset {
                first_name,
                reset_url,
            } => (
                "Reset your Ownerific password".to_string(),
                format!(
                    "Hi {first_name},\n\nUse this link to choose a new password:\n\n\
                     {reset_url}\n\nIt works once and expires in 2 hours. If you did not ask \
                     for a reset, ignore this email.\n"
                ),
            ),
            Template::TransferUpdate {
                first_name,
                amount_cents,
                direction,
                status,
            } => (
                format!("Your {direction} is {status}"),
                format!(
                    "Hi {first_name},\n\nYour {direction} of ${} is now {status}.\n",
                    cents_to_decimal(*amount_cents)
                ),
            ),
        };

        Email {
            from: from.to_string(),
            to: to.to_string(),
            subject,
            body,
        }
    }
}

/// Web app page that accepts a reset or claim token.
pub fn reset_link(app_base_url: &str, token: &str) -> String {
    format!(
        "{}/reset-password?token={token}",
        app_base_url.trim_end_matches('/')
    )
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), AppError>;
}

/// Writes each message to the log instead of an SMTP relay.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), AppError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            bytes = email.body.len(),
            "email sent"
        );
        Ok(())
    }
}

/// Keeps every message for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<Email>>,
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), AppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_names_the_employer() {
        let email = Template::EmployeeInvite {
            first_name: "Ana".to_string(),
            employer_name: "Acme".to_string(),
            claim_url: reset_link("https://app.ownerific.com", "abc123"),
        }
        .render("hello@ownerific.com", "ana@acme.com");

        assert_eq!(email.subject, "Acme added you to Ownerific");
        assert!(email.body.starts_with("Hi Ana,"));
        assert!(
            email
                .body
                .contains("https://app.ownerific.com/reset-password?token=abc123")
        );
        assert_eq!(email.to, "ana@acme.com");
    }

    #[test]
    fn reset_link_ignores_trailing_slash() {
        assert_eq!(
            reset_link("http://localhost:5173/", "t0k"),
            "http://localhost:5173/reset-password?token=t0k"
        );
    }

    #[test]
    fn transfer_update_formats_dollars() {
        let email = Template::TransferUpdate {
            first_name: "Ana".to_string(),
            amount_cents: 25_050,
            direction: "deposit".to_string(),
            status: "processed".to_string(),
        }
        .render("from", "to");

        assert_eq!(email.subject, "Your deposit is processed");
        assert!(email.body.contains("$250.50"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let email = Template::Welcome {
            first_name: "Ana".to_string(),
        }
        .render("from", "to");
        assert!(LogMailer.send(&email).await.is_ok());
    }
}
