//! User repository; balance updates are single conditional statements

use rusqlite::{params, Connection, OptionalExtension};

use super::{decode_ts, encode_ts, DatabaseError};
use crate::models::User;

const USER_COLUMNS: &str = "id, email, username, password_hash, credits, is_active, created_at";

pub struct UserRepo<'a> {
    conn: &'a Connection,
}

impl<'a> UserRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, user: &User) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO users (id, email, username, password_hash, credits, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                user.id,
                user.email,
                user.username,
                user.password_hash,
                user.credits,
                user.is_active,
                encode_ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        self.find_by("id", id)
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        self.find_by("username", username)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        self.find_by("email", email)
    }

    fn find_by(&self, column: &str, value: &str) -> Result<Option<User>, DatabaseError> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column),
                [value],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Subtract `amount` only if the balance covers it
    ///
    /// Returns `false` (and changes nothing) when the user is missing or the
    /// balance is too low.
    pub fn try_debit(&self, id: &str, amount: i64) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE users SET credits = credits - ?1 WHERE id = ?2 AND credits >= ?1",
            params![amount, id],
        )?;
        Ok(changed > 0)
    }

    pub fn add_credits(&self, id: &str, amount: i64) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE users SET credits = credits + ?1 WHERE id = ?2",
            params![amount, id],
        )?;
        Ok(changed > 0)
    }

    /// Apply a signed delta, flooring the stored balance at zero
    pub fn apply_delta(&self, id: &str, delta: i64) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE users SET credits = MAX(credits + ?1, 0) WHERE id = ?2",
            params![delta, id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE users SET is_active = ? WHERE id = ?",
            params![active, id],
        )?;
        Ok(changed > 0)
    }

    pub fn balance(&self, id: &str) -> Result<Option<i64>, DatabaseError> {
        let credits = self
            .conn
            .query_row("SELECT credits FROM users WHERE id = ?", [id], |row| row.get(0))
            .optional()?;
        Ok(credits)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let created_at_str: String = row.get(6)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        credits: row.get(4)?,
        is_active: row.get(5)?,
        created_at: decode_ts(6, &created_at_str)?,
    })
}
