//! Append-only API usage log

use rusqlite::{params, Connection};

use super::{decode_ts, encode_ts, DatabaseError};
use crate::models::ApiUsage;

pub struct UsageRepo<'a> {
    conn: &'a Connection,
}

impl<'a> UsageRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a usage row and return its id
    pub fn log(&self, usage: &ApiUsage) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO api_usage (user_id, endpoint, credits_used, timestamp) VALUES (?, ?, ?, ?)",
            params![
                usage.user_id,
                usage.endpoint,
                usage.credits_used,
                encode_ts(&usage.timestamp),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest first
    pub fn list_for_user(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<ApiUsage>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, endpoint, credits_used, timestamp FROM api_usage
             WHERE user_id = ? ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
        )?;

        let rows = stmt.query_map(params![user_id, limit, skip], |row| {
            let timestamp_str: String = row.get(4)?;
            Ok(ApiUsage {
                id: Some(row.get(0)?),
                user_id: row.get(1)?,
                endpoint: row.get(2)?,
                credits_used: row.get(3)?,
                timestamp: decode_ts(4, &timestamp_str)?,
            })
        })?;

        let mut usage = Vec::new();
        for row in rows {
            usage.push(row?);
        }
        Ok(usage)
    }
}
