use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The open session as the engine tracks it in memory. The durable row
/// carries the same fields; this is the working copy.
#[derive(Debug, Clone)]
pub struct OpenSession {
    pub id: i64,
    pub media_id: String,
    pub media_title: String,
    pub started_at: DateTime<Utc>,
}

impl OpenSession {
    /// Midpoint of the session, the reward eligibility cutoff.
    pub fn halfway(&self, ended_at: DateTime<Utc>) -> DateTime<Utc> {
        self.started_at + (ended_at - self.started_at) / 2
    }
}

/// Handle to a spawned chain of reconciliation attempts. Cancelling
/// both signals the token and aborts the task, so an attempt parked on
/// a sleep or a lock never outlives the session it was scheduled for.
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { token, handle }
    }

    pub fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// Per-room working state, owned exclusively by the engine. One entry
/// per room in the engine's room table; rooms never share anything.
#[derive(Default)]
pub struct RoomState {
    pub open: Option<OpenSession>,
    /// username -> join time for currently active watchers.
    pub watchers: HashMap<String, DateTime<Utc>>,
    /// The first media change after attach reflects whatever was
    /// already playing and must not open a session.
    pub media_seen: bool,
    pub reconcile_task: Option<ScheduledTask>,
}

impl RoomState {
    pub fn cancel_reconcile(&mut self) {
        if let Some(task) = self.reconcile_task.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn halfway_splits_the_session_evenly() {
        let started = Utc::now();
        let open = OpenSession {
            id: 1,
            media_id: "yt:abc".into(),
            media_title: "abc".into(),
            started_at: started,
        };
        let ended = started + Duration::minutes(10);
        assert_eq!(open.halfway(ended), started + Duration::minutes(5));
        assert_eq!(open.halfway(started), started);
    }
}
