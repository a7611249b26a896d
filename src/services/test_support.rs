//! Fakes shared by the service tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::summarizer_service::{SummarizeError, Summarizer};
use crate::adapters::{MailError, Mailer, OutgoingEmail};

enum Behavior {
    Succeed(String),
    Fail(Box<dyn Fn() -> SummarizeError + Send + Sync>),
    Panic,
}

pub struct FakeSummarizer {
    behavior: Behavior,
    calls: AtomicU32,
}

impl FakeSummarizer {
    pub fn succeeding(summary: &str) -> Self {
        Self::with(Behavior::Succeed(summary.to_string()))
    }

    pub fn failing(make_error: impl Fn() -> SummarizeError + Send + Sync + 'static) -> Self {
        Self::with(Behavior::Fail(Box::new(make_error)))
    }

    pub fn panicking() -> Self {
        Self::with(Behavior::Panic)
    }

    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, _text: &str, _max_length: u32) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(summary) => Ok(summary.clone()),
            Behavior::Fail(make_error) => Err(make_error()),
            Behavior::Panic => panic!("summarizer blew up"),
        }
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Always fails; transient or permanent depending on construction
pub struct FailingMailer {
    transient: bool,
    attempts: AtomicU32,
}

impl FailingMailer {
    pub fn transient() -> Self {
        Self {
            transient: true,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn permanent() -> Self {
        Self {
            transient: false,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(MailError::Transient("421 try again later".to_string()))
        } else {
            Err(MailError::Permanent("550 mailbox unavailable".to_string()))
        }
    }
}
