//! Services module for business logic
//!
//! This module contains service implementations that coordinate
//! between adapters and storage: submission, the credit ledger, the work
//! queue, the background worker and user notifications.

pub mod job_manager;
pub mod job_queue;
pub mod ledger;
pub mod notifier;
pub mod summarizer_service;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use job_manager::{JobManager, SubmitError};
pub use job_queue::{Dequeued, InMemoryQueue, WorkQueue};
pub use ledger::{CreditLedger, LedgerError};
pub use notifier::{NotifyError, Notifier};
pub use summarizer_service::{SummarizeError, Summarizer, SummarizerService, SummaryFilter};
pub use worker::{JobOutcome, JobWorker, WorkerConfig, WorkerError, WorkerState, WorkerSupervisor};
