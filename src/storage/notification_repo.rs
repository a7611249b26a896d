//! Notification repository

use rusqlite::{params, Connection, OptionalExtension};

use super::{decode_ts, encode_ts, DatabaseError};
use crate::models::Notification;

const NOTIFICATION_COLUMNS: &str = "id, user_id, job_id, message, is_read, created_at";

pub struct NotificationRepo<'a> {
    conn: &'a Connection,
}

impl<'a> NotificationRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, notification: &Notification) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO notifications (id, user_id, job_id, message, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                notification.id,
                notification.user_id,
                notification.job_id,
                notification.message,
                notification.is_read,
                encode_ts(&notification.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Notification>, DatabaseError> {
        let notification = self
            .conn
            .query_row(
                &format!("SELECT {} FROM notifications WHERE id = ?", NOTIFICATION_COLUMNS),
                [id],
                row_to_notification,
            )
            .optional()?;
        Ok(notification)
    }

    /// Newest first
    pub fn list_for_user(
        &self,
        user_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            NOTIFICATION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, limit, skip], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Mark read, but only for the owning user
    pub fn mark_read(&self, id: &str, user_id: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn count_unread(&self, user_id: &str) -> Result<i64, DatabaseError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let created_at_str: String = row.get(5)?;

    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_id: row.get(2)?,
        message: row.get(3)?,
        is_read: row.get(4)?,
        created_at: decode_ts(5, &created_at_str)?,
    })
}
