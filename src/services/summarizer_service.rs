//! Summarizer service for remote summarization output
//!
//! This service handles:
//! - Validating inputs before anything goes over the wire
//! - Delegating to a pluggable [`Summarizer`] backend
//! - Cleaning the returned text (duplicate sentences, known hallucinations)
//! - Reporting a summary that cleans down to nothing as a failure

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Phrases the upstream model is known to hallucinate
pub const DEFAULT_DENYLIST: &[&str] = &["eight suns", "no moons"];

const SENTENCE_SEPARATOR: &str = ". ";

/// Failure modes of a summarization call
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Invalid summarization input: {0}")]
    InvalidInput(String),

    #[error("Summarization model is loading, retry in {retry_after_secs}s")]
    ServiceLoading { retry_after_secs: u64 },

    #[error("Summarization service returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    #[error("Could not reach summarization service: {0}")]
    ConnectionFailed(String),

    #[error("Malformed summarization response: {0}")]
    MalformedResponse(String),

    #[error("Summarization produced an empty summary")]
    EmptySummary,
}

/// A backend that turns a document into a summary of at most `max_length` tokens
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_length: u32) -> Result<String, SummarizeError>;
}

/// Post-processing applied to every raw summary
#[derive(Debug, Clone)]
pub struct SummaryFilter {
    denylist: Vec<String>,
}

impl Default for SummaryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST.iter().map(|s| s.to_string()))
    }
}

impl SummaryFilter {
    pub fn new(denylist: impl IntoIterator<Item = String>) -> Self {
        Self {
            denylist: denylist.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Drop repeated and denylisted sentences, keeping first-seen order
    pub fn clean(&self, summary: &str) -> String {
        let mut seen = HashSet::new();
        let kept: Vec<&str> = summary
            .split(SENTENCE_SEPARATOR)
            .filter(|sentence| seen.insert(*sentence))
            .filter(|sentence| {
                let lower = sentence.to_lowercase();
                !self.denylist.iter().any(|phrase| lower.contains(phrase.as_str()))
            })
            .collect();

        kept.join(SENTENCE_SEPARATOR).trim().to_string()
    }
}

/// Validating, cleaning front for a summarization backend
pub struct SummarizerService {
    backend: Arc<dyn Summarizer>,
    filter: SummaryFilter,
}

impl SummarizerService {
    pub fn new(backend: Arc<dyn Summarizer>) -> Self {
        Self {
            backend,
            filter: SummaryFilter::default(),
        }
    }

    pub fn with_filter(backend: Arc<dyn Summarizer>, filter: SummaryFilter) -> Self {
        Self { backend, filter }
    }
}

#[async_trait]
impl Summarizer for SummarizerService {
    async fn summarize(&self, text: &str, max_length: u32) -> Result<String, SummarizeError> {
        if text.trim().is_empty() {
            return Err(SummarizeError::InvalidInput("document text is empty".to_string()));
        }
        if max_length == 0 {
            return Err(SummarizeError::InvalidInput(
                "max_length must be positive".to_string(),
            ));
        }

        info!(
            "Summarizing document with length {} and max_length {}",
            text.chars().count(),
            max_length
        );

        let raw = self.backend.summarize(text, max_length).await?;
        let cleaned = self.filter.clean(&raw);
        debug!("Cleaned summary from {} to {} chars", raw.len(), cleaned.len());

        if cleaned.is_empty() {
            warn!("Summary was empty after cleaning");
            return Err(SummarizeError::EmptySummary);
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::FakeSummarizer;

    #[test]
    fn test_clean_removes_duplicates_in_order() {
        let filter = SummaryFilter::default();
        let cleaned = filter.clean("The cat sat. The dog ran. The cat sat. It rained.");
        assert_eq!(cleaned, "The cat sat. The dog ran. It rained.");
    }

    #[test]
    fn test_clean_drops_denylisted_sentences() {
        let filter = SummaryFilter::default();
        let cleaned = filter.clean("Earth orbits the sun. Earth has Eight Suns. Mars has two moons");
        assert_eq!(cleaned, "Earth orbits the sun. Mars has two moons");

        let cleaned = filter.clean("Saturn has no moons. Saturn has rings");
        assert_eq!(cleaned, "Saturn has rings");
    }

    #[test]
    fn test_custom_denylist() {
        let filter = SummaryFilter::new(vec!["Lorem".to_string()]);
        assert_eq!(filter.clean("lorem ipsum. Real text"), "Real text");
        assert_eq!(filter.clean("eight suns shine"), "eight suns shine");
    }

    #[tokio::test]
    async fn test_service_rejects_invalid_input() {
        let service = SummarizerService::new(Arc::new(FakeSummarizer::succeeding("x")));
        assert!(matches!(
            service.summarize("   ", 100).await,
            Err(SummarizeError::InvalidInput(_))
        ));
        assert!(matches!(
            service.summarize("some text", 0).await,
            Err(SummarizeError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_service_cleans_backend_output() {
        let backend = FakeSummarizer::succeeding("Short. Short. Accurate");
        let service = SummarizerService::new(Arc::new(backend));
        assert_eq!(service.summarize("document", 100).await.unwrap(), "Short. Accurate");
    }

    #[tokio::test]
    async fn test_fully_filtered_summary_is_an_error() {
        let backend = FakeSummarizer::succeeding("The planet has eight suns");
        let service = SummarizerService::new(Arc::new(backend));
        assert!(matches!(
            service.summarize("document", 100).await,
            Err(SummarizeError::EmptySummary)
        ));
    }

    #[tokio::test]
    async fn test_backend_errors_pass_through() {
        let backend = FakeSummarizer::failing(|| SummarizeError::ServiceLoading {
            retry_after_secs: 20,
        });
        let service = SummarizerService::new(Arc::new(backend));
        let err = service.summarize("document", 100).await.unwrap_err();
        assert!(err.to_string().contains("loading"));
    }
}
