//! Job Manager service for summarization submissions
//!
//! Validates a request, prices it, and in a single transaction debits the
//! user, records the job and logs usage. The job id is enqueued only after the
//! transaction commits.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::job_queue::WorkQueue;
use super::ledger::{debit_in, LedgerError};
use crate::models::{ApiUsage, Job, JobRequest, ValidationError};
use crate::storage::{DatabaseError, JobRepo, Store, UsageRepo, UserRepo};

/// Endpoint label recorded in the usage log for submissions
pub const USAGE_ENDPOINT: &str = "/jobs/";

/// Documents longer than this many words cost one extra credit
pub const LONG_DOCUMENT_WORDS: usize = 500;
/// ...and longer than this, one more
pub const VERY_LONG_DOCUMENT_WORDS: usize = 2000;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid job request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not enough credits. Required: {required}, Available: {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("User {0} is inactive")]
    UserInactive(String),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<LedgerError> for SubmitError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits {
                required,
                available,
            } => SubmitError::InsufficientCredits {
                required,
                available,
            },
            LedgerError::UserNotFound(id) => SubmitError::UserNotFound(id),
            LedgerError::Store(e) => SubmitError::Store(e),
            other => SubmitError::Ledger(other),
        }
    }
}

/// Price of a job: the base cost plus one credit per length tier crossed
pub fn credit_cost(word_count: usize, base: i64) -> i64 {
    let mut cost = base;
    if word_count > LONG_DOCUMENT_WORDS {
        cost += 1;
    }
    if word_count > VERY_LONG_DOCUMENT_WORDS {
        cost += 1;
    }
    cost
}

/// Accepts submissions and serves job reads
pub struct JobManager {
    store: Store,
    queue: Arc<dyn WorkQueue>,
    cost_per_request: i64,
}

impl JobManager {
    pub fn new(store: Store, queue: Arc<dyn WorkQueue>, cost_per_request: i64) -> Self {
        Self {
            store,
            queue,
            cost_per_request,
        }
    }

    /// Submit a summarization job on behalf of `user_id`
    ///
    /// On any error nothing is persisted: no debit, no job, no usage row.
    pub fn submit(&self, user_id: &str, request: &JobRequest) -> Result<Job, SubmitError> {
        let max_summary_length = request.validate()?;
        let cost = credit_cost(request.word_count(), self.cost_per_request);

        let job = self.store.transaction(|tx| {
            let user = UserRepo::new(tx)
                .get(user_id)?
                .ok_or_else(|| SubmitError::UserNotFound(user_id.to_string()))?;
            if !user.is_active {
                return Err(SubmitError::UserInactive(user_id.to_string()));
            }

            debit_in(tx, user_id, cost)?;

            let job = Job::new(user_id, &request.document_text, max_summary_length, cost);
            JobRepo::new(tx).create(&job)?;
            UsageRepo::new(tx).log(&ApiUsage::new(user_id, USAGE_ENDPOINT, cost))?;
            Ok(job)
        })?;

        self.queue.enqueue(&job.id);
        info!(
            "Created job {} for user {} costing {} credits",
            job.id, user_id, cost
        );

        Ok(job)
    }

    /// Get a job, but only if `user_id` owns it
    pub fn get_job(&self, user_id: &str, job_id: &str) -> Result<Option<Job>, SubmitError> {
        let job = self.store.with_conn(|conn| JobRepo::new(conn).get(job_id))?;
        Ok(job.filter(|j| j.user_id == user_id))
    }

    /// A user's jobs, newest first
    pub fn list_jobs(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<Job>, SubmitError> {
        debug!("Listing jobs for user {} (skip {}, limit {})", user_id, skip, limit);
        Ok(self
            .store
            .with_conn(|conn| JobRepo::new(conn).list_for_user(user_id, skip, limit))?)
    }
}
