//! Job repository: persistence and guarded state transitions

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{decode_opt_ts, decode_ts, encode_ts, DatabaseError};
use crate::models::{Job, JobStatus};

const JOB_COLUMNS: &str = "id, user_id, document_text, max_summary_length, status, result,
     credits_used, created_at, started_at, processed_at";

/// Repository for job records
pub struct JobRepo<'a> {
    conn: &'a Connection,
}

impl<'a> JobRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new job
    pub fn create(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO jobs (id, user_id, document_text, max_summary_length, status, result,
                               credits_used, created_at, started_at, processed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job.id,
                job.user_id,
                job.document_text,
                job.max_summary_length,
                job.status.as_str(),
                job.result,
                job.credits_used,
                encode_ts(&job.created_at),
                job.started_at.as_ref().map(encode_ts),
                job.processed_at.as_ref().map(encode_ts),
            ],
        )?;
        Ok(())
    }

    /// Get a job by ID
    pub fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// List a user's jobs, newest first
    pub fn list_for_user(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<Job>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, limit, skip], row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Oldest pending jobs first, at most `limit`
    pub fn list_pending(&self, limit: i64) -> Result<Vec<Job>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = 'pending'
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([limit], row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Move a job to `to`, only if it is currently in `to`'s predecessor state
    ///
    /// Returns the updated job, or `None` when the job is missing or was not in
    /// the required state (someone else already moved it). `processed_at` is
    /// stamped in the same statement that enters a terminal state, so it is
    /// written exactly once.
    pub fn transition(
        &self,
        id: &str,
        to: JobStatus,
        result: Option<&str>,
    ) -> Result<Option<Job>, DatabaseError> {
        let from = to.predecessor().ok_or_else(|| DatabaseError::InvalidTransition {
            id: id.to_string(),
            to: to.as_str(),
        })?;
        let now = encode_ts(&Utc::now());

        let changed = if to.is_terminal() {
            self.conn.execute(
                "UPDATE jobs SET status = ?, result = ?, processed_at = ?
                 WHERE id = ? AND status = ? AND processed_at IS NULL",
                params![to.as_str(), result, now, id, from.as_str()],
            )?
        } else {
            self.conn.execute(
                "UPDATE jobs SET status = ?, started_at = ? WHERE id = ? AND status = ?",
                params![to.as_str(), now, id, from.as_str()],
            )?
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    /// Put processing jobs that started before `cutoff` back to pending
    pub fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self.conn.execute(
            "UPDATE jobs SET status = 'pending', started_at = NULL
             WHERE status = 'processing' AND started_at < ?",
            [encode_ts(&cutoff)],
        )?;
        Ok(count)
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let status_str: String = row.get(4)?;
    let status = JobStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown job status '{}'", status_str).into(),
        )
    })?;

    let created_at_str: String = row.get(7)?;

    Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        document_text: row.get(2)?,
        max_summary_length: row.get(3)?,
        status,
        result: row.get(5)?,
        credits_used: row.get(6)?,
        created_at: decode_ts(7, &created_at_str)?,
        started_at: decode_opt_ts(8, row.get(8)?)?,
        processed_at: decode_opt_ts(9, row.get(9)?)?,
    })
}
