//! Outbound email delivery
//!
//! [`SmtpMailer`] talks STARTTLS to a relay through lettre. [`LogMailer`] only
//! writes the message to the log and is used when SMTP is not configured.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::config::EmailSettings;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Temporary delivery failure: {0}")]
    Transient(String),

    #[error("Delivery failed: {0}")]
    Permanent(String),
}

impl MailError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

/// A plain-text email ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP delivery over STARTTLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
    ) -> Result<Self, MailError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {}", from, e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| MailError::Permanent(format!("Failed to create SMTP transport: {}", e)))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        info!("Created SMTP transport for {}:{}", host, port);

        Ok(Self { transport, from })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {}", email.to, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;

        self.transport.send(message).await.map_err(|e| {
            error!("Failed to send email to {}: {}", email.to, e);
            if e.is_permanent() {
                MailError::Permanent(e.to_string())
            } else {
                MailError::Transient(e.to_string())
            }
        })?;

        info!("Sent email to {}", email.to);
        Ok(())
    }
}

/// Logs the message instead of sending it
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!("Email notification would be sent to {}", email.to);
        info!("Subject: {}", email.subject);
        info!("Body: {}", email.body);
        Ok(())
    }
}

/// SMTP when fully configured, otherwise the logging fallback
pub fn mailer_from_settings(settings: &EmailSettings) -> Result<Arc<dyn Mailer>, MailError> {
    match (&settings.host, &settings.username, &settings.password) {
        (Some(host), Some(username), Some(password)) => Ok(Arc::new(SmtpMailer::new(
            host,
            settings.port,
            username,
            password,
            &settings.from,
        )?)),
        _ => {
            info!("SMTP not configured, emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}
