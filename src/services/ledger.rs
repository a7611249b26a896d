//! Credit ledger: per-user balances and the usage audit log
//!
//! Every mutation is one conditional statement, so concurrent callers can
//! never drive a balance negative.

use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{ApiUsage, User};
use crate::storage::{DatabaseError, Store, UsageRepo, UserRepo};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not enough credits. Required: {required}, Available: {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

pub struct CreditLedger {
    store: Store,
    default_credits: i64,
}

impl CreditLedger {
    pub fn new(store: Store, default_credits: i64) -> Self {
        Self {
            store,
            default_credits,
        }
    }

    /// Create a user holding the configured starting balance
    pub fn open_account(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, LedgerError> {
        let user = User::new(email, username, password_hash, self.default_credits);
        self.store.with_conn(|conn| UserRepo::new(conn).create(&user))?;
        info!("Opened account {} with {} credits", user.username, user.credits);
        Ok(user)
    }

    pub fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.store
            .with_conn(|conn| UserRepo::new(conn).balance(user_id))?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    /// Remove `amount` credits, refusing to overdraw
    pub fn debit(&self, user_id: &str, amount: i64) -> Result<User, LedgerError> {
        self.store.transaction(|tx| debit_in(tx, user_id, amount))
    }

    /// Add `amount` credits (manual refunds and top-ups)
    pub fn credit(&self, user_id: &str, amount: i64) -> Result<User, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let user = self.store.transaction(|tx| {
            let repo = UserRepo::new(tx);
            if !repo.add_credits(user_id, amount)? {
                return Err(LedgerError::UserNotFound(user_id.to_string()));
            }
            load_user(&repo, user_id)
        })?;
        info!("Credited {} credits to user {}", amount, user_id);
        Ok(user)
    }

    /// Apply a signed delta; the balance never drops below zero
    pub fn adjust(&self, user_id: &str, delta: i64) -> Result<User, LedgerError> {
        self.store.transaction(|tx| {
            let repo = UserRepo::new(tx);
            if !repo.apply_delta(user_id, delta)? {
                return Err(LedgerError::UserNotFound(user_id.to_string()));
            }
            load_user(&repo, user_id)
        })
    }

    /// Usage rows for a user, newest first
    pub fn usage(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<ApiUsage>, LedgerError> {
        Ok(self
            .store
            .with_conn(|conn| UsageRepo::new(conn).list_for_user(user_id, skip, limit))?)
    }
}

/// Debit on an open connection or transaction
///
/// The sufficiency check and the write are the same statement; on refusal the
/// current balance is read back only to report it.
pub(crate) fn debit_in(conn: &Connection, user_id: &str, amount: i64) -> Result<User, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let repo = UserRepo::new(conn);
    if !repo.try_debit(user_id, amount)? {
        return match repo.balance(user_id)? {
            Some(available) => {
                warn!(
                    "Refused debit of {} for user {}: only {} available",
                    amount, user_id, available
                );
                Err(LedgerError::InsufficientCredits {
                    required: amount,
                    available,
                })
            }
            None => Err(LedgerError::UserNotFound(user_id.to_string())),
        };
    }

    load_user(&repo, user_id)
}

fn load_user(repo: &UserRepo<'_>, user_id: &str) -> Result<User, LedgerError> {
    repo.get(user_id)?
        .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CreditLedger {
        CreditLedger::new(Store::in_memory().unwrap(), 10)
    }

    #[test]
    fn test_open_account_uses_default_balance() {
        let ledger = ledger();
        let user = ledger.open_account("a@example.com", "a", "hash").unwrap();
        assert_eq!(user.credits, 10);
        assert_eq!(ledger.balance(&user.id).unwrap(), 10);
    }

    #[test]
    fn test_debit_and_credit() {
        let ledger = ledger();
        let user = ledger.open_account("a@example.com", "a", "hash").unwrap();

        assert_eq!(ledger.debit(&user.id, 3).unwrap().credits, 7);
        assert_eq!(ledger.credit(&user.id, 2).unwrap().credits, 9);
    }

    #[test]
    fn test_overdraft_is_refused_without_change() {
        let ledger = ledger();
        let user = ledger.open_account("a@example.com", "a", "hash").unwrap();

        match ledger.debit(&user.id, 11) {
            Err(LedgerError::InsufficientCredits { required, available }) => {
                assert_eq!(required, 11);
                assert_eq!(available, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(ledger.balance(&user.id).unwrap(), 10);
    }

    #[test]
    fn test_non_positive_amounts_are_rejected() {
        let ledger = ledger();
        let user = ledger.open_account("a@example.com", "a", "hash").unwrap();

        assert!(matches!(ledger.debit(&user.id, 0), Err(LedgerError::InvalidAmount(0))));
        assert!(matches!(ledger.credit(&user.id, -1), Err(LedgerError::InvalidAmount(-1))));
    }

    #[test]
    fn test_unknown_user() {
        let ledger = ledger();
        assert!(matches!(ledger.debit("ghost", 1), Err(LedgerError::UserNotFound(_))));
        assert!(matches!(ledger.credit("ghost", 1), Err(LedgerError::UserNotFound(_))));
        assert!(matches!(ledger.balance("ghost"), Err(LedgerError::UserNotFound(_))));
    }

    #[test]
    fn test_adjust_clamps_at_zero() {
        let ledger = ledger();
        let user = ledger.open_account("a@example.com", "a", "hash").unwrap();

        assert_eq!(ledger.adjust(&user.id, -25).unwrap().credits, 0);
        assert_eq!(ledger.adjust(&user.id, 5).unwrap().credits, 5);
    }
}
