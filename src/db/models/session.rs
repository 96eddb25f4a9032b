use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One watch period for one room. `ended_at` stays NULL while the
/// session is open; at most one open session exists per room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSession {
    pub id: i64,
    pub room_id: String,
    pub media_id: String,
    pub media_title: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}
