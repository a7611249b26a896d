use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub const MIN_DOCUMENT_CHARS: usize = 30;
pub const MAX_DOCUMENT_CHARS: usize = 10_000;
pub const MIN_SUMMARY_LENGTH: u32 = 30;
pub const MAX_SUMMARY_LENGTH: u32 = 500;
pub const DEFAULT_SUMMARY_LENGTH: u32 = 150;

/// Job status enumeration
///
/// `Pending -> Processing -> Completed | Failed`. Terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only state a job may be in immediately before entering `self`
    pub fn predecessor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::Processing => Some(JobStatus::Pending),
            JobStatus::Completed | JobStatus::Failed => Some(JobStatus::Processing),
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessor() == Some(*self)
    }

    /// Capitalized label used in notification subjects
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

/// Reasons a submission is rejected before it touches the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("document text must be between {min} and {max} characters (got {actual})")]
    DocumentLength { min: usize, max: usize, actual: usize },
    #[error("max summary length must be between {min} and {max} (got {actual})")]
    SummaryLength { min: u32, max: u32, actual: u32 },
}

/// A summarization request as received from the outside world
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub document_text: String,
    #[serde(default)]
    pub max_summary_length: Option<u32>,
}

impl JobRequest {
    pub fn new(document_text: impl Into<String>, max_summary_length: Option<u32>) -> Self {
        Self {
            document_text: document_text.into(),
            max_summary_length,
        }
    }

    /// Check bounds and resolve the summary length default
    pub fn validate(&self) -> Result<u32, ValidationError> {
        let chars = self.document_text.chars().count();
        if !(MIN_DOCUMENT_CHARS..=MAX_DOCUMENT_CHARS).contains(&chars) {
            return Err(ValidationError::DocumentLength {
                min: MIN_DOCUMENT_CHARS,
                max: MAX_DOCUMENT_CHARS,
                actual: chars,
            });
        }

        let length = self.max_summary_length.unwrap_or(DEFAULT_SUMMARY_LENGTH);
        if !(MIN_SUMMARY_LENGTH..=MAX_SUMMARY_LENGTH).contains(&length) {
            return Err(ValidationError::SummaryLength {
                min: MIN_SUMMARY_LENGTH,
                max: MAX_SUMMARY_LENGTH,
                actual: length,
            });
        }

        Ok(length)
    }

    pub fn word_count(&self) -> usize {
        self.document_text.split_whitespace().count()
    }
}

/// Job record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub document_text: String,
    pub max_summary_length: u32,
    pub status: JobStatus,
    pub result: Option<String>,
    pub credits_used: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job
    pub fn new(user_id: &str, document_text: &str, max_summary_length: u32, credits_used: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            document_text: document_text.to_string(),
            max_summary_length,
            status: JobStatus::Pending,
            result: None,
            credits_used,
            created_at: Utc::now(),
            started_at: None,
            processed_at: None,
        }
    }

    /// First few characters of the document, for log lines
    pub fn preview(&self) -> String {
        let preview: String = self.document_text.chars().take(50).collect();
        if preview.len() < self.document_text.len() {
            format!("{}...", preview)
        } else {
            preview
        }
    }
}
