use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Append-only audit row for every metered call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiUsage {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub user_id: String,
    pub endpoint: String,
    pub credits_used: i64,
    pub timestamp: DateTime<Utc>,
}

impl ApiUsage {
    pub fn new(user_id: &str, endpoint: &str, credits_used: i64) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            endpoint: endpoint.to_string(),
            credits_used,
            timestamp: Utc::now(),
        }
    }
}
