//! Hugging Face inference API client
//!
//! Sends documents to a hosted summarization model (BART by default).
//! See: https://huggingface.co/docs/api-inference/

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::services::{SummarizeError, Summarizer};

pub const DEFAULT_MODEL_URL: &str =
    "https://api-inference.huggingface.co/models/facebook/bart-large-cnn";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const PROMPT_PREFIX: &str = "Summarize accurately:\n";
const MIN_LENGTH_FLOOR: u32 = 30;
/// Used when a 503 body carries no `estimated_time`
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
struct SummarizeRequest {
    inputs: String,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_length: u32,
    min_length: u32,
    do_sample: bool,
    temperature: f32,
    repetition_penalty: f32,
    no_repeat_ngram_size: u32,
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    summary_text: String,
}

/// The endpoint answers with either a list or a bare object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SummaryResponse {
    List(Vec<SummaryItem>),
    Single(SummaryItem),
}

#[derive(Debug, Deserialize)]
struct LoadingResponse {
    estimated_time: Option<f64>,
}

/// Client for the Hugging Face inference API
pub struct HuggingFaceClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HuggingFaceClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `api_url` - Model endpoint to POST to
    /// * `api_key` - Optional bearer token
    /// * `timeout` - Upper bound on a whole request
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SummarizeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                SummarizeError::ConnectionFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self::with_client(client, api_url, api_key))
    }

    /// Create a new client with an existing reqwest client
    pub fn with_client(client: Client, api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn build_request(&self, payload: &SummarizeRequest) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.api_url).json(payload);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn payload(text: &str, max_length: u32) -> SummarizeRequest {
        SummarizeRequest {
            inputs: format!("{}{}", PROMPT_PREFIX, text),
            parameters: GenerationParameters {
                max_length,
                min_length: MIN_LENGTH_FLOOR.min(max_length),
                do_sample: false,
                temperature: 0.7,
                repetition_penalty: 1.5,
                no_repeat_ngram_size: 2,
            },
        }
    }
}

/// Map an HTTP status and body onto a raw summary or a typed failure
fn interpret(status: StatusCode, body: &str) -> Result<String, SummarizeError> {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        let retry_after_secs = serde_json::from_str::<LoadingResponse>(body)
            .ok()
            .and_then(|r| r.estimated_time)
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|t| t.ceil() as u64)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        error!("Model loading: {}", body);
        return Err(SummarizeError::ServiceLoading { retry_after_secs });
    }

    if !status.is_success() {
        error!("API error: {} - {}", status.as_u16(), body);
        return Err(SummarizeError::ServiceError {
            status: status.as_u16(),
            message: body.chars().take(ERROR_BODY_LIMIT).collect(),
        });
    }

    let parsed: SummaryResponse = serde_json::from_str(body)
        .map_err(|e| SummarizeError::MalformedResponse(e.to_string()))?;

    match parsed {
        SummaryResponse::Single(item) => Ok(item.summary_text),
        SummaryResponse::List(items) => items
            .into_iter()
            .next()
            .map(|item| item.summary_text)
            .ok_or_else(|| SummarizeError::MalformedResponse("empty result list".to_string())),
    }
}

#[async_trait]
impl Summarizer for HuggingFaceClient {
    async fn summarize(&self, text: &str, max_length: u32) -> Result<String, SummarizeError> {
        info!("Sending request to {}", self.api_url);

        let response = self
            .build_request(&Self::payload(text, max_length))
            .send()
            .await
            .map_err(|e| {
                error!("Connection failed: {}", e);
                if e.is_timeout() {
                    SummarizeError::ConnectionFailed(format!("request timed out: {}", e))
                } else {
                    SummarizeError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        debug!("API Status: {}", status);

        let body = response
            .text()
            .await
            .map_err(|e| SummarizeError::ConnectionFailed(e.to_string()))?;

        interpret(status, &body)
    }
}
