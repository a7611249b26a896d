//! Background job worker
//!
//! [`JobWorker`] drains the work queue one job at a time and moves each job
//! through PENDING -> PROCESSING -> COMPLETED/FAILED. When the queue is idle it
//! sweeps the store for PENDING jobs the queue has lost and for PROCESSING jobs
//! that were abandoned past the staleness threshold.
//!
//! [`WorkerSupervisor`] owns the lifecycle: the loop runs on a dedicated OS
//! thread with its own runtime, so slow summarization calls never stall
//! callers, and a panic escaping the loop is reported as `Crashed`.

use chrono::Utc;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::job_queue::{Dequeued, WorkQueue};
use super::notifier::Notifier;
use super::summarizer_service::Summarizer;
use crate::config::WorkerSettings;
use crate::models::JobStatus;
use crate::storage::{DatabaseError, JobRepo, Store};
use crate::utils::retry::{with_retry, RetryConfig};

const WORKER_THREAD_NAME: &str = "job-worker";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one dequeue waits before the worker goes idle
    pub dequeue_timeout: Duration,
    /// Maximum PENDING jobs re-enqueued per sweep
    pub reconcile_batch: i64,
    /// Pause after each idle sweep
    pub reconcile_pause: Duration,
    /// PROCESSING jobs older than this are reverted to PENDING; `None` disables
    pub stale_after: Option<Duration>,
    /// Backoff for the terminal status write
    pub finalize_retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(settings.dequeue_timeout_ms),
            reconcile_batch: settings.reconcile_batch,
            reconcile_pause: Duration::from_millis(settings.reconcile_pause_ms),
            stale_after: match settings.stale_processing_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            finalize_retry: RetryConfig {
                max_retries: 4,
                ..RetryConfig::default()
            },
        }
    }
}

/// What happened to a dequeued job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    /// Missing, already picked up, or already finished
    Skipped,
}

pub struct JobWorker {
    store: Store,
    queue: Arc<dyn WorkQueue>,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<Notifier>,
    config: WorkerConfig,
}

impl JobWorker {
    pub fn new(
        store: Store,
        queue: Arc<dyn WorkQueue>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<Notifier>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            summarizer,
            notifier,
            config,
        }
    }

    /// Run one job to a terminal state
    ///
    /// Safe to call with any id any number of times: only a PENDING job is
    /// processed, and only the caller that wins the PENDING -> PROCESSING
    /// update does the work.
    pub async fn process_job(&self, job_id: &str) -> Result<JobOutcome, DatabaseError> {
        let job = match self.store.with_conn(|conn| JobRepo::new(conn).get(job_id))? {
            Some(job) => job,
            None => {
                warn!("Job {} not found", job_id);
                return Ok(JobOutcome::Skipped);
            }
        };

        if job.status != JobStatus::Pending {
            debug!("Skipping job {} in status {}", job_id, job.status.as_str());
            return Ok(JobOutcome::Skipped);
        }

        let job = match self
            .store
            .with_conn(|conn| JobRepo::new(conn).transition(job_id, JobStatus::Processing, None))?
        {
            Some(job) => job,
            None => {
                debug!("Job {} was picked up elsewhere", job_id);
                return Ok(JobOutcome::Skipped);
            }
        };

        info!("Processing job {} with text: {}", job.id, job.preview());

        let summarizer = self.summarizer.clone();
        let text = job.document_text.clone();
        let max_length = job.max_summary_length;
        let call = tokio::spawn(async move { summarizer.summarize(&text, max_length).await });

        let (status, result) = match call.await {
            Ok(Ok(summary)) => (JobStatus::Completed, summary),
            Ok(Err(e)) => (JobStatus::Failed, format!("Error: {}", e)),
            Err(e) if e.is_panic() => (
                JobStatus::Failed,
                format!("Error: summarizer panicked: {}", panic_message(e.into_panic())),
            ),
            Err(e) => (JobStatus::Failed, format!("Error: {}", e)),
        };

        let store = &self.store;
        let summary = result.as_str();
        let finished = with_retry(
            &self.config.finalize_retry,
            "Job finalization",
            move || async move {
                store.with_conn(|conn| JobRepo::new(conn).transition(job_id, status, Some(summary)))
            },
            |e: &DatabaseError| !matches!(e, DatabaseError::InvalidTransition { .. }),
        )
        .await?;
        let Some(finished) = finished else {
            warn!("Job {} left PROCESSING before it could be finalized", job_id);
            return Ok(JobOutcome::Skipped);
        };

        match status {
            JobStatus::Completed => info!("Job {} completed successfully", job_id),
            _ => error!("Job {} failed: {}", job_id, result),
        }

        if let Err(e) = self.notifier.notify(&finished).await {
            error!("Failed to notify about job {}: {}", job_id, e);
        }

        Ok(match status {
            JobStatus::Completed => JobOutcome::Completed,
            _ => JobOutcome::Failed(result),
        })
    }

    /// Re-enqueue PENDING jobs the queue does not currently hold
    pub fn reconcile(&self) -> Result<usize, DatabaseError> {
        let pending = self
            .store
            .with_conn(|conn| JobRepo::new(conn).list_pending(self.config.reconcile_batch))?;

        let mut requeued = 0;
        for job in pending {
            if !self.queue.is_queued(&job.id) {
                info!("Requeuing pending job {}", job.id);
                self.queue.enqueue(&job.id);
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Revert PROCESSING jobs stuck past the staleness threshold
    pub fn recover_stale(&self) -> Result<usize, DatabaseError> {
        let Some(age) = self.config.stale_after else {
            return Ok(0);
        };
        let cutoff = i64::try_from(age.as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        let count = self
            .store
            .with_conn(|conn| JobRepo::new(conn).requeue_stale(cutoff))?;
        if count > 0 {
            warn!("Reverted {} stale processing jobs to pending", count);
        }
        Ok(count)
    }

    /// Main loop; returns once `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Job processor started");

        if let Err(e) = self.recover_stale() {
            error!("Stale job recovery failed: {}", e);
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                dequeued = self.queue.dequeue(self.config.dequeue_timeout) => match dequeued {
                    Dequeued::Job(job_id) => {
                        if let Err(e) = self.process_job(&job_id).await {
                            error!("Error processing job {}: {}", job_id, e);
                        }
                    }
                    Dequeued::Empty => {
                        if let Err(e) = self.recover_stale() {
                            error!("Stale job recovery failed: {}", e);
                        }
                        if let Err(e) = self.reconcile() {
                            error!("Reconciliation failed: {}", e);
                        }
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(self.config.reconcile_pause) => {}
                        }
                    }
                },
            }
        }

        info!("Job processor stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Crashed(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker is already running")]
    AlreadyRunning,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Failed to join worker thread: {0}")]
    Join(String),
}

struct RunningWorker {
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Start/stop control for a single [`JobWorker`] loop
pub struct WorkerSupervisor {
    worker: Arc<JobWorker>,
    state: Arc<watch::Sender<WorkerState>>,
    running: Mutex<Option<RunningWorker>>,
}

impl WorkerSupervisor {
    pub fn new(worker: Arc<JobWorker>) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            worker,
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }

    /// Watch state changes (e.g. to wait for a crash in tests or a health check)
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Start the loop on its own thread
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut running = self.lock();
        if self.state() == WorkerState::Running {
            return Err(WorkerError::AlreadyRunning);
        }
        // A crashed loop's thread has already finished; drop its handle.
        running.take();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = self.worker.clone();
        let state = self.state.clone();
        self.state.send_replace(WorkerState::Running);

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to build worker runtime: {}", e);
                        state.send_replace(WorkerState::Crashed(e.to_string()));
                        return;
                    }
                };

                let result = runtime.block_on(async move {
                    tokio::spawn(async move { worker.run(shutdown_rx).await }).await
                });

                let next = match result {
                    Ok(()) => WorkerState::Stopped,
                    Err(e) if e.is_panic() => {
                        let reason = panic_message(e.into_panic());
                        error!("Job processor crashed: {}", reason);
                        WorkerState::Crashed(reason)
                    }
                    Err(e) => WorkerState::Crashed(e.to_string()),
                };
                state.send_replace(next);
            })
            .map_err(|e| {
                self.state.send_replace(WorkerState::Stopped);
                WorkerError::Spawn(e.to_string())
            })?;

        *running = Some(RunningWorker {
            shutdown: shutdown_tx,
            thread,
        });
        info!("Worker started");
        Ok(())
    }

    /// Start again if the previous loop crashed; returns whether it restarted
    pub fn restart_if_crashed(&self) -> Result<bool, WorkerError> {
        if let WorkerState::Crashed(reason) = self.state() {
            warn!("Restarting crashed worker: {}", reason);
            self.start()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Signal the loop to stop and wait for its thread to exit
    ///
    /// A job already being processed is finished first.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let running = self.lock().take();
        let Some(running) = running else {
            return Ok(());
        };

        let _ = running.shutdown.send(true);
        tokio::task::spawn_blocking(move || running.thread.join())
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))?
            .map_err(|e| WorkerError::Join(panic_message(e)))?;

        self.state.send_replace(WorkerState::Stopped);
        info!("Worker stopped");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningWorker>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        if let Some(running) = self.lock().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobRequest, User};
    use crate::services::job_manager::JobManager;
    use crate::services::job_queue::InMemoryQueue;
    use crate::services::ledger::CreditLedger;
    use crate::services::summarizer_service::{SummarizeError, SummarizerService};
    use crate::services::test_support::{FailingMailer, FakeSummarizer, RecordingMailer};
    use crate::storage::{encode_ts, NotificationRepo, UserRepo};
    use crate::adapters::Mailer;
    use crate::utils::retry::RetryConfig;
    use async_trait::async_trait;

    struct Harness {
        store: Store,
        queue: Arc<InMemoryQueue>,
        manager: JobManager,
        worker: Arc<JobWorker>,
        user: User,
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            dequeue_timeout: Duration::from_millis(20),
            reconcile_batch: 5,
            reconcile_pause: Duration::from_millis(20),
            stale_after: Some(Duration::from_secs(900)),
            finalize_retry: RetryConfig {
                max_retries: 5,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(100),
                multiplier: 2.0,
            },
        }
    }

    fn harness_with(summarizer: Arc<dyn Summarizer>, mailer: Arc<dyn Mailer>) -> Harness {
        let store = Store::in_memory().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let notifier = Arc::new(Notifier::with_retry(
            store.clone(),
            mailer,
            RetryConfig::none(),
        ));
        let worker = Arc::new(JobWorker::new(
            store.clone(),
            queue.clone(),
            summarizer,
            notifier,
            fast_config(),
        ));
        let manager = JobManager::new(store.clone(), queue.clone(), 1);
        let user = User::new("reader@example.com", "reader", "hash", 10);
        store
            .with_conn(|conn| UserRepo::new(conn).create(&user))
            .unwrap();
        Harness {
            store,
            queue,
            manager,
            worker,
            user,
        }
    }

    fn harness(summarizer: Arc<dyn Summarizer>) -> Harness {
        harness_with(summarizer, Arc::new(RecordingMailer::default()))
    }

    fn forty_words() -> JobRequest {
        JobRequest::new(vec!["lorem"; 40].join(" "), Some(100))
    }

    fn load(store: &Store, id: &str) -> Job {
        store
            .with_conn(|conn| JobRepo::new(conn).get(id))
            .unwrap()
            .unwrap()
    }

    fn notifications(store: &Store, user_id: &str) -> usize {
        store
            .with_conn(|conn| NotificationRepo::new(conn).list_for_user(user_id, 0, 100))
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let summarizer = Arc::new(FakeSummarizer::succeeding("Lorem repeated. Lorem repeated"));
        let h = harness(Arc::new(SummarizerService::new(summarizer.clone())));
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();
        assert_eq!(load(&h.store, &job.id).status, JobStatus::Pending);

        let outcome = h.worker.process_job(&job.id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let done = load(&h.store, &job.id);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("Lorem repeated"));
        assert!(done.started_at.is_some());
        assert!(done.processed_at.is_some());
        assert_eq!(notifications(&h.store, &h.user.id), 1);
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_loading_backend_fails_job_without_refund() {
        let summarizer = Arc::new(FakeSummarizer::failing(|| SummarizeError::ServiceLoading {
            retry_after_secs: 20,
        }));
        let h = harness(summarizer);
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();

        let outcome = h.worker.process_job(&job.id).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        let failed = load(&h.store, &job.id);
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.result.unwrap().contains("loading"));
        assert!(failed.processed_at.is_some());
        assert_eq!(notifications(&h.store, &h.user.id), 1);

        let ledger = CreditLedger::new(h.store.clone(), 0);
        assert_eq!(ledger.balance(&h.user.id).unwrap(), 9);
    }

    #[tokio::test]
    async fn test_duplicate_dequeue_is_a_no_op() {
        let summarizer = Arc::new(FakeSummarizer::succeeding("First summary"));
        let h = harness(summarizer.clone());
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();

        h.worker.process_job(&job.id).await.unwrap();
        let first = load(&h.store, &job.id);

        assert_eq!(h.worker.process_job(&job.id).await.unwrap(), JobOutcome::Skipped);
        let second = load(&h.store, &job.id);
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.result, first.result);
        assert_eq!(second.processed_at, first.processed_at);
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(notifications(&h.store, &h.user.id), 1);
    }

    #[tokio::test]
    async fn test_missing_job_is_skipped() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("x")));
        assert_eq!(h.worker.process_job("missing").await.unwrap(), JobOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_panicking_summarizer_fails_job() {
        let h = harness(Arc::new(FakeSummarizer::panicking()));
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();

        let outcome = h.worker.process_job(&job.id).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        let failed = load(&h.store, &job.id);
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.result.unwrap().contains("summarizer blew up"));
    }

    #[tokio::test]
    async fn test_mailer_failure_keeps_terminal_state() {
        let h = harness_with(
            Arc::new(FakeSummarizer::succeeding("Fine")),
            Arc::new(FailingMailer::permanent()),
        );
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();

        assert_eq!(h.worker.process_job(&job.id).await.unwrap(), JobOutcome::Completed);
        assert_eq!(load(&h.store, &job.id).status, JobStatus::Completed);
        assert_eq!(notifications(&h.store, &h.user.id), 1);
    }

    #[tokio::test]
    async fn test_reconcile_requeues_only_unqueued_pending_jobs() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("x")));
        let lost = Job::new(&h.user.id, "lost pending job text here", 150, 1);
        let stuck = Job::new(&h.user.id, "processing job text here", 150, 1);
        h.store
            .with_conn(|conn| {
                let repo = JobRepo::new(conn);
                repo.create(&lost)?;
                repo.create(&stuck)?;
                repo.transition(&stuck.id, JobStatus::Processing, None)
            })
            .unwrap();
        let queued = h.manager.submit(&h.user.id, &forty_words()).unwrap();

        assert_eq!(h.worker.reconcile().unwrap(), 1);
        assert!(h.queue.is_queued(&lost.id));
        assert!(!h.queue.is_queued(&stuck.id));
        assert_eq!(h.queue.len(), 2);
        assert!(h.queue.is_queued(&queued.id));

        assert_eq!(h.worker.reconcile().unwrap(), 0);
        assert_eq!(load(&h.store, &stuck.id).status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_stale_processing_jobs_recovered_past_threshold() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("x")));
        let stale = Job::new(&h.user.id, "stale job text here", 150, 1);
        let recent = Job::new(&h.user.id, "recent job text here", 150, 1);
        h.store
            .with_conn(|conn| {
                let repo = JobRepo::new(conn);
                repo.create(&stale)?;
                repo.create(&recent)?;
                repo.transition(&stale.id, JobStatus::Processing, None)?;
                repo.transition(&recent.id, JobStatus::Processing, None)?;
                conn.execute(
                    "UPDATE jobs SET started_at = ?1 WHERE id = ?2",
                    rusqlite::params![
                        encode_ts(&(Utc::now() - chrono::Duration::hours(2))),
                        stale.id
                    ],
                )?;
                Ok::<_, DatabaseError>(())
            })
            .unwrap();

        assert_eq!(h.worker.recover_stale().unwrap(), 1);
        assert_eq!(load(&h.store, &stale.id).status, JobStatus::Pending);
        assert_eq!(load(&h.store, &recent.id).status, JobStatus::Processing);

        let disabled = JobWorker::new(
            h.store.clone(),
            h.queue.clone(),
            Arc::new(FakeSummarizer::succeeding("x")),
            Arc::new(Notifier::new(h.store.clone(), Arc::new(RecordingMailer::default()))),
            WorkerConfig {
                stale_after: None,
                ..fast_config()
            },
        );
        assert_eq!(disabled.recover_stale().unwrap(), 0);
    }

    async fn wait_for_status(store: &Store, id: &str, wanted: JobStatus) -> Job {
        for _ in 0..200 {
            let job = load(store, id);
            if job.status == wanted {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never reached {:?}", id, wanted);
    }

    #[tokio::test]
    async fn test_supervisor_runs_jobs_end_to_end() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("Done")));
        let supervisor = WorkerSupervisor::new(h.worker.clone());
        assert_eq!(supervisor.state(), WorkerState::Stopped);

        supervisor.start().unwrap();
        assert_eq!(supervisor.state(), WorkerState::Running);
        assert!(matches!(supervisor.start(), Err(WorkerError::AlreadyRunning)));

        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();
        let done = wait_for_status(&h.store, &job.id, JobStatus::Completed).await;
        assert_eq!(done.result.as_deref(), Some("Done"));

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), WorkerState::Stopped);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_picks_up_jobs_missing_from_queue() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("Recovered")));
        let orphan = Job::new(&h.user.id, "job created while nothing listened", 150, 1);
        h.store
            .with_conn(|conn| JobRepo::new(conn).create(&orphan))
            .unwrap();

        let supervisor = WorkerSupervisor::new(h.worker.clone());
        supervisor.start().unwrap();
        wait_for_status(&h.store, &orphan.id, JobStatus::Completed).await;
        supervisor.stop().await.unwrap();
    }

    const BLOCK_FINISH: &str = "CREATE TRIGGER block_finish BEFORE UPDATE OF status ON jobs
         WHEN NEW.status IN ('completed', 'failed')
         BEGIN SELECT RAISE(ABORT, 'disk unavailable'); END;";

    fn set_finish_blocked(store: &Store, blocked: bool) {
        let sql = if blocked {
            BLOCK_FINISH
        } else {
            "DROP TRIGGER block_finish"
        };
        store.with_conn(|conn| conn.execute_batch(sql)).unwrap();
    }

    #[tokio::test]
    async fn test_terminal_write_is_retried_until_store_recovers() {
        let h = harness(Arc::new(FakeSummarizer::succeeding("Done")));
        let job = h.manager.submit(&h.user.id, &forty_words()).unwrap();
        set_finish_blocked(&h.store, true);

        let store = h.store.clone();
        let unblock = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            set_finish_blocked(&store, false);
        });

        assert_eq!(h.worker.process_job(&job.id).await.unwrap(), JobOutcome::Completed);
        unblock.await.unwrap();

        let done = load(&h.store, &job.id);
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.processed_at.is_some());
        assert_eq!(notifications(&h.store, &h.user.id), 1);
    }

    #[tokio::test]
    async fn test_running_worker_recovers_job_whose_terminal_write_failed() {
        let summarizer = Arc::new(FakeSummarizer::succeeding("Done"));
        let store = Store::in_memory().unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        let notifier = Arc::new(Notifier::with_retry(
            store.clone(),
            Arc::new(RecordingMailer::default()),
            RetryConfig::none(),
        ));
        let worker = Arc::new(JobWorker::new(
            store.clone(),
            queue.clone(),
            summarizer.clone(),
            notifier,
            WorkerConfig {
                stale_after: Some(Duration::from_secs(1)),
                ..fast_config()
            },
        ));
        let manager = JobManager::new(store.clone(), queue, 1);
        let user = User::new("reader@example.com", "reader", "hash", 10);
        store
            .with_conn(|conn| UserRepo::new(conn).create(&user))
            .unwrap();

        set_finish_blocked(&store, true);
        let supervisor = WorkerSupervisor::new(worker);
        supervisor.start().unwrap();

        let job = manager.submit(&user.id, &forty_words()).unwrap();
        wait_for_status(&store, &job.id, JobStatus::Processing).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(load(&store, &job.id).status, JobStatus::Processing);
        set_finish_blocked(&store, false);

        let done = wait_for_status(&store, &job.id, JobStatus::Completed).await;
        assert_eq!(done.result.as_deref(), Some("Done"));
        assert_eq!(supervisor.state(), WorkerState::Running);
        assert_eq!(summarizer.calls(), 2);
        assert_eq!(notifications(&store, &user.id), 1);

        supervisor.stop().await.unwrap();
    }

    struct ExplodingQueue;

    #[async_trait]
    impl WorkQueue for ExplodingQueue {
        fn enqueue(&self, _job_id: &str) {}

        async fn dequeue(&self, _timeout: Duration) -> Dequeued {
            panic!("queue exploded");
        }

        fn is_queued(&self, _job_id: &str) -> bool {
            false
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_loop_panic_is_reported_and_restartable() {
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            Arc::new(RecordingMailer::default()),
        ));
        let worker = Arc::new(JobWorker::new(
            store,
            Arc::new(ExplodingQueue),
            Arc::new(FakeSummarizer::succeeding("x")),
            notifier,
            fast_config(),
        ));
        let supervisor = WorkerSupervisor::new(worker);
        let mut states = supervisor.subscribe();

        supervisor.start().unwrap();
        let crashed = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| matches!(s, WorkerState::Crashed(_))),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(crashed, WorkerState::Crashed("queue exploded".to_string()));

        assert!(supervisor.restart_if_crashed().unwrap());
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), WorkerState::Stopped);
    }
}
