//! In-process work queue carrying job ids
//!
//! The queue is a hint, not the source of truth: the worker always re-reads
//! the job from the store, and reconciliation re-enqueues anything dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Result of waiting on the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Job(String),
    /// Nothing arrived before the timeout
    Empty,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Never blocks and never fails
    fn enqueue(&self, job_id: &str);

    async fn dequeue(&self, timeout: Duration) -> Dequeued;

    fn is_queued(&self, job_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded FIFO backed by a tokio channel
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    /// Multiset of ids currently buffered
    queued: Mutex<HashMap<String, usize>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            queued: Mutex::new(HashMap::new()),
        }
    }

    fn queued(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, job_id: &str) {
        let mut queued = self.queued();
        if let Some(count) = queued.get_mut(job_id) {
            *count -= 1;
            if *count == 0 {
                queued.remove(job_id);
            }
        }
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    fn enqueue(&self, job_id: &str) {
        *self.queued().entry(job_id.to_string()).or_insert(0) += 1;
        // The receiver lives as long as self, so this cannot fail.
        if self.tx.send(job_id.to_string()).is_err() {
            self.forget(job_id);
        }
        debug!("Enqueued job {}", job_id);
    }

    async fn dequeue(&self, timeout: Duration) -> Dequeued {
        let received = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match received {
            Ok(Some(job_id)) => {
                self.forget(&job_id);
                Dequeued::Job(job_id)
            }
            Ok(None) | Err(_) => Dequeued::Empty,
        }
    }

    fn is_queued(&self, job_id: &str) -> bool {
        self.queued().contains_key(job_id)
    }

    fn len(&self) -> usize {
        self.queued().values().sum()
    }
}
