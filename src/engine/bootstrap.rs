use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::{
    db::WatchSession,
    engine::{state::OpenSession, RoomDirectory, RewardSink, WatchEngine},
};

impl<D, L> WatchEngine<D, L>
where
    D: RoomDirectory + 'static,
    L: RewardSink + 'static,
{
    /// Restores state after an unclean shutdown. Must run to completion
    /// before any live events are fed, otherwise resumed state races
    /// with fresh events for the same rooms.
    pub async fn bootstrap(&self) -> Result<()> {
        self.bootstrap_at(Utc::now()).await
    }

    pub async fn bootstrap_at(&self, now: DateTime<Utc>) -> Result<()> {
        let open_sessions = self.db.get_open_sessions().await?;
        if open_sessions.is_empty() {
            return Ok(());
        }

        let max_age = Duration::seconds(self.settings.stale_session_max_age_secs as i64);
        let mut handled: HashSet<String> = HashSet::new();

        // Oldest first: the first open session per room is the
        // candidate; any further one violates the one-open-session
        // invariant and is settled without rewards.
        for session in open_sessions {
            if !handled.insert(session.room_id.clone()) {
                warn!(
                    "Room {} has more than one open session; closing session {}",
                    session.room_id, session.id
                );
                self.abandon_session(&session, now).await?;
                continue;
            }

            if now - session.started_at > max_age {
                info!(
                    "Abandoning stale session {} in {} ({} minutes old)",
                    session.id,
                    session.room_id,
                    (now - session.started_at).num_minutes()
                );
                self.abandon_session(&session, now).await?;
                continue;
            }

            let members = self.directory.members(&session.room_id).await?;
            let members = self.filter_members(members);

            let room = self.room_entry(&session.room_id).await;
            let mut state = room.lock().await;
            let rows = self.db.get_active_watchers(session.id).await?;
            for row in rows {
                if members.contains(&row.username) {
                    state.watchers.insert(row.username, row.joined_at);
                } else {
                    self.db
                        .mark_watcher_left(session.id, &row.username, now)
                        .await?;
                }
            }

            info!(
                "Resumed session {} in {} with {} watchers",
                session.id,
                session.room_id,
                state.watchers.len()
            );
            state.open = Some(OpenSession {
                id: session.id,
                media_id: session.media_id.clone(),
                media_title: session.media_title.clone(),
                started_at: session.started_at,
            });
            // This is a resumption, not a fresh attach: the next media
            // change must close and reopen, not be suppressed.
            state.media_seen = true;
        }

        Ok(())
    }

    /// Closes a session with no reward pass; its watcher state can no
    /// longer be trusted.
    async fn abandon_session(&self, session: &WatchSession, now: DateTime<Utc>) -> Result<()> {
        self.db.close_active_watchers(session.id, now).await?;
        let duration_ms = (now - session.started_at).num_milliseconds().max(0) as u64;
        self.db.close_session(session.id, now, duration_ms).await?;
        Ok(())
    }
}
