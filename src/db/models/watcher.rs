use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's participation window within a session. A user who leaves
/// and rejoins gets a fresh row; at most one row per (session, user)
/// has `left_at` unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watcher {
    pub id: String,
    pub session_id: i64,
    pub username: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub rewarded: bool,
    pub reward_amount: Option<i64>,
}
