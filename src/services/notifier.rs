//! Job completion notifications
//!
//! A notification row is always written for a finished job. Email is best
//! effort on top of that: failures are logged and never reach the caller.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{MailError, Mailer, OutgoingEmail};
use crate::models::{Job, JobStatus, Notification};
use crate::storage::{DatabaseError, NotificationRepo, Store, UserRepo};
use crate::utils::retry::{with_retry, RetryConfig};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Job {0} has not finished yet")]
    NotTerminal(String),

    #[error("User {user_id} not found for job {job_id}")]
    UserNotFound { user_id: String, job_id: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// In-app message for a finished job
pub fn completion_message(job: &Job) -> String {
    match job.status {
        JobStatus::Completed => format!("Your job (ID: {}) has been completed successfully.", job.id),
        _ => format!("Your job (ID: {}) has failed to process.", job.id),
    }
}

fn email_body(username: &str, message: &str) -> String {
    format!(
        "Hello {},\n\n{}\n\nYou can check the results in your dashboard.\n\nThank you for using our AI service!\n",
        username, message
    )
}

pub struct Notifier {
    store: Store,
    mailer: Arc<dyn Mailer>,
    retry: RetryConfig,
}

impl Notifier {
    pub fn new(store: Store, mailer: Arc<dyn Mailer>) -> Self {
        Self::with_retry(store, mailer, RetryConfig::default())
    }

    pub fn with_retry(store: Store, mailer: Arc<dyn Mailer>, retry: RetryConfig) -> Self {
        Self {
            store,
            mailer,
            retry,
        }
    }

    /// Record a notification for a finished job and try to email its owner
    pub async fn notify(&self, job: &Job) -> Result<Notification, NotifyError> {
        if !job.status.is_terminal() {
            return Err(NotifyError::NotTerminal(job.id.clone()));
        }

        let message = completion_message(job);
        let (user, notification) = self.store.with_conn(|conn| {
            let user = UserRepo::new(conn).get(&job.user_id)?.ok_or_else(|| {
                NotifyError::UserNotFound {
                    user_id: job.user_id.clone(),
                    job_id: job.id.clone(),
                }
            })?;
            let notification = Notification::new(&user.id, Some(&job.id), message.clone());
            NotificationRepo::new(conn).create(&notification)?;
            Ok::<_, NotifyError>((user, notification))
        })?;

        info!("Notified user {} about job {}", user.id, job.id);

        let email = OutgoingEmail {
            to: user.email.clone(),
            subject: format!("AI Service Job {}", job.status.label()),
            body: email_body(&user.username, &message),
        };
        self.deliver(&email).await;

        Ok(notification)
    }

    async fn deliver(&self, email: &OutgoingEmail) {
        let result = with_retry(
            &self.retry,
            "Email delivery",
            || self.mailer.send(email),
            MailError::is_transient,
        )
        .await;

        if let Err(e) = result {
            warn!("Failed to send email to {}: {}", email.to, e);
        }
    }

    pub fn list_for_user(
        &self,
        user_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, NotifyError> {
        Ok(self
            .store
            .with_conn(|conn| NotificationRepo::new(conn).list_for_user(user_id, skip, limit))?)
    }

    pub fn unread_count(&self, user_id: &str) -> Result<i64, NotifyError> {
        Ok(self
            .store
            .with_conn(|conn| NotificationRepo::new(conn).count_unread(user_id))?)
    }

    /// Returns false when the notification does not exist or belongs to someone else
    pub fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<bool, NotifyError> {
        Ok(self
            .store
            .with_conn(|conn| NotificationRepo::new(conn).mark_read(notification_id, user_id))?)
    }
}
