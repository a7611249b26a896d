//! Wiring: one place that turns [`Settings`] into running services

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::adapters::{mailer_from_settings, HuggingFaceClient, MailError, Mailer};
use crate::config::{ConfigError, Settings};
use crate::services::{
    CreditLedger, InMemoryQueue, JobManager, JobWorker, Notifier, SummarizeError, Summarizer,
    SummarizerService, SummaryFilter, WorkerConfig, WorkerError, WorkerSupervisor,
};
use crate::storage::{DatabaseError, Store};
use crate::utils::logging::LoggingError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Summarizer(#[from] SummarizeError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub struct App {
    pub store: Store,
    pub queue: Arc<InMemoryQueue>,
    pub ledger: CreditLedger,
    pub jobs: JobManager,
    pub notifier: Arc<Notifier>,
    pub supervisor: WorkerSupervisor,
}

impl App {
    /// Open the database and build the real summarizer and mailer
    ///
    /// Must be called inside a tokio runtime (the SMTP transport starts its
    /// connection pool on construction).
    pub fn build(settings: &Settings) -> Result<Self, AppError> {
        let store = Store::open(&settings.database_path)?;

        let client = HuggingFaceClient::new(
            settings.summarizer.api_url.clone(),
            settings.summarizer.api_key.clone(),
            settings.summarizer.timeout(),
        )?;
        let summarizer = Arc::new(SummarizerService::with_filter(
            Arc::new(client),
            SummaryFilter::new(settings.summarizer.denylist.clone()),
        ));
        let mailer = mailer_from_settings(&settings.email)?;

        info!("Summarizing with {}", settings.summarizer.api_url);
        Ok(Self::assemble(store, summarizer, mailer, settings))
    }

    pub fn assemble(
        store: Store,
        summarizer: Arc<dyn Summarizer>,
        mailer: Arc<dyn Mailer>,
        settings: &Settings,
    ) -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        let notifier = Arc::new(Notifier::new(store.clone(), mailer));
        let worker = Arc::new(JobWorker::new(
            store.clone(),
            queue.clone(),
            summarizer,
            notifier.clone(),
            WorkerConfig::from(&settings.worker),
        ));

        Self {
            ledger: CreditLedger::new(store.clone(), settings.credits.default_credits),
            jobs: JobManager::new(store.clone(), queue.clone(), settings.credits.cost_per_request),
            supervisor: WorkerSupervisor::new(worker),
            store,
            queue,
            notifier,
        }
    }
}
