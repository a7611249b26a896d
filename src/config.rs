//! Runtime settings
//!
//! Settings come from `settings.json` in the user's config directory (when
//! present), then environment variables override individual fields.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::adapters::huggingface::{DEFAULT_MODEL_URL, DEFAULT_TIMEOUT_SECS};
use crate::services::summarizer_service::DEFAULT_DENYLIST;

const APP_DIR: &str = "synopsis";
const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "synopsis.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub summarizer: SummarizerSettings,
    pub email: EmailSettings,
    pub credits: CreditSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Sentences containing any of these phrases are dropped from summaries
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditSettings {
    /// Starting balance for new accounts
    pub default_credits: i64,
    /// Base price of one summarization job
    pub cost_per_request: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub dequeue_timeout_ms: u64,
    pub reconcile_batch: i64,
    pub reconcile_pause_ms: u64,
    /// Age after which an abandoned PROCESSING job is put back to PENDING; 0 disables
    pub stale_processing_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join(DATABASE_FILE),
            log_dir: None,
            summarizer: SummarizerSettings::default(),
            email: EmailSettings::default(),
            credits: CreditSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_MODEL_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            username: None,
            password: None,
            from: "noreply@localhost".to_string(),
        }
    }
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            default_credits: 10,
            cost_per_request: 1,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 1_000,
            reconcile_batch: 5,
            reconcile_pause_ms: 5_000,
            stale_processing_secs: 900,
        }
    }
}

impl SummarizerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Location of `settings.json`, if the platform has a config directory
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(SETTINGS_FILE))
}

impl Settings {
    /// Load from the default settings file and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = settings_path();
        Self::load_from(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Load from `path` (missing file means defaults), then apply `env`
    pub fn load_from(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                debug!("Loading settings from {:?}", p);
                let content = fs::read_to_string(p)?;
                serde_json::from_str(&content)?
            }
            _ => Settings::default(),
        };

        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("AI_API_URL") {
            self.summarizer.api_url = v;
        }
        if let Some(v) = get("AI_API_KEY") {
            self.summarizer.api_key = Some(v);
        }
        if let Some(v) = get("EMAIL_HOST") {
            self.email.host = Some(v);
        }
        if let Some(v) = get("EMAIL_PORT") {
            self.email.port = parse_value("EMAIL_PORT", &v)?;
        }
        if let Some(v) = get("EMAIL_USERNAME") {
            self.email.username = Some(v);
        }
        if let Some(v) = get("EMAIL_PASSWORD") {
            self.email.password = Some(v);
        }
        if let Some(v) = get("EMAIL_FROM") {
            self.email.from = v;
        }
        if let Some(v) = get("DEFAULT_CREDITS") {
            self.credits.default_credits = parse_value("DEFAULT_CREDITS", &v)?;
        }
        if let Some(v) = get("COST_PER_REQUEST") {
            self.credits.cost_per_request = parse_value("COST_PER_REQUEST", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credits.cost_per_request < 1 {
            return Err(ConfigError::Invalid("cost_per_request must be at least 1".into()));
        }
        if self.credits.default_credits < 0 {
            return Err(ConfigError::Invalid("default_credits cannot be negative".into()));
        }
        if self.summarizer.timeout_secs == 0 {
            return Err(ConfigError::Invalid("summarizer timeout must be positive".into()));
        }
        if self.email.port == 0 {
            return Err(ConfigError::Invalid("email port must be positive".into()));
        }
        if self.worker.dequeue_timeout_ms == 0 || self.worker.reconcile_batch < 1 {
            return Err(ConfigError::Invalid(
                "worker dequeue timeout and reconcile batch must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
