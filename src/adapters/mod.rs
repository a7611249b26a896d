//! External service adapters
//!
//! This module contains adapters for external services:
//! - Hugging Face: hosted summarization model
//! - Mailer: SMTP delivery with a logging fallback

pub mod huggingface;
pub mod mailer;

// Re-export commonly used types
pub use huggingface::HuggingFaceClient;
pub use mailer::{mailer_from_settings, LogMailer, MailError, Mailer, OutgoingEmail, SmtpMailer};
