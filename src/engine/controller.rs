use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    db::Database,
    engine::{
        state::{OpenSession, RoomState},
        RoomDirectory, RewardSink,
    },
    settings::EngineSettings,
};

/// Read-only view of a room for the host's status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub session_id: i64,
    pub media_id: String,
    pub media_title: String,
    pub started_at: DateTime<Utc>,
    pub watcher_count: usize,
}

/// The reconciliation engine. One instance serves every room; each
/// room's state sits behind its own lock in the room table, so one
/// room's payout I/O never stalls another room's events. The table
/// lock itself is only held long enough to look a room up.
pub struct WatchEngine<D, L> {
    pub(crate) db: Database,
    pub(crate) directory: Arc<D>,
    pub(crate) ledger: Arc<L>,
    pub(crate) settings: EngineSettings,
    pub(crate) rooms: Arc<Mutex<HashMap<String, Arc<Mutex<RoomState>>>>>,
}

impl<D, L> Clone for WatchEngine<D, L> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            directory: self.directory.clone(),
            ledger: self.ledger.clone(),
            settings: self.settings.clone(),
            rooms: self.rooms.clone(),
        }
    }
}

impl<D, L> WatchEngine<D, L>
where
    D: RoomDirectory + 'static,
    L: RewardSink + 'static,
{
    pub fn new(db: Database, directory: Arc<D>, ledger: Arc<L>, settings: EngineSettings) -> Self {
        Self {
            db,
            directory,
            ledger,
            settings,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A media change ends the current session (paying out its
    /// watchers) and opens the next one. The very first media change a
    /// room reports after attach is only whatever was already playing,
    /// so it is recorded and ignored.
    pub async fn on_media_change(
        &self,
        room_id: &str,
        media_id: &str,
        media_title: &str,
    ) -> Result<()> {
        self.on_media_change_at(room_id, media_id, media_title, Utc::now())
            .await
    }

    pub async fn on_media_change_at(
        &self,
        room_id: &str,
        media_id: &str,
        media_title: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let room = self.room_entry(room_id).await;
        let mut state = room.lock().await;

        if !state.media_seen {
            state.media_seen = true;
            debug!("First media change in {room_id} ({media_title}); not tracking");
            return Ok(());
        }

        self.close_open_session(room_id, &mut state, now).await?;

        let session_id = self
            .db
            .insert_session(room_id, media_id, media_title, now)
            .await?;
        state.open = Some(OpenSession {
            id: session_id,
            media_id: media_id.to_string(),
            media_title: media_title.to_string(),
            started_at: now,
        });
        state.watchers.clear();
        info!("Session {session_id} opened in {room_id}: {media_title}");

        // Initial pass; may see a stale or empty userlist if the
        // membership snapshot for this change has not landed yet. The
        // scheduled attempts below catch up.
        match self.directory.members(room_id).await {
            Ok(members) => {
                let members = self.filter_members(members);
                self.reconcile_with_members(room_id, &mut state, members, now, "initial")
                    .await?;
            }
            Err(err) => {
                debug!("Initial reconciliation in {room_id} skipped: {err}");
            }
        }

        state.reconcile_task = Some(self.schedule_reconcile(room_id, session_id));

        Ok(())
    }

    /// Confirmed join. Ignored when no session is open or the user is
    /// already tracked.
    pub async fn on_user_join(&self, room_id: &str, username: &str) -> Result<()> {
        self.on_user_join_at(room_id, username, Utc::now()).await
    }

    pub async fn on_user_join_at(
        &self,
        room_id: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.directory.is_system_user(username) {
            return Ok(());
        }

        let Some(room) = self.existing_room(room_id).await else {
            return Ok(());
        };
        let mut state = room.lock().await;
        let Some(open) = state.open.clone() else {
            debug!("Join from {username} in {room_id} with no session open");
            return Ok(());
        };

        if state.watchers.contains_key(username) {
            return Ok(());
        }

        if !self.db.insert_watcher(open.id, username, now).await? {
            // A durable window already exists; track the user anyway so
            // the payout pass sees them.
            debug!("{username} already has an open window in session {}", open.id);
        }
        state.watchers.insert(username.to_string(), now);

        Ok(())
    }

    /// Confirmed leave. A leave for an untracked user is a logged
    /// no-op; membership sources are known to be unreliable.
    pub async fn on_user_leave(&self, room_id: &str, username: &str) -> Result<()> {
        self.on_user_leave_at(room_id, username, Utc::now()).await
    }

    pub async fn on_user_leave_at(
        &self,
        room_id: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(room) = self.existing_room(room_id).await else {
            return Ok(());
        };
        let mut state = room.lock().await;
        let Some(open) = state.open.clone() else {
            return Ok(());
        };

        if state.watchers.remove(username).is_some() {
            self.db.mark_watcher_left(open.id, username, now).await?;
        } else {
            debug!("Leave from untracked user {username} in {room_id}");
        }

        Ok(())
    }

    pub async fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let room = self.existing_room(room_id).await?;
        let state = room.lock().await;
        let open = state.open.as_ref()?;
        Some(RoomSnapshot {
            session_id: open.id,
            media_id: open.media_id.clone(),
            media_title: open.media_title.clone(),
            started_at: open.started_at,
            watcher_count: state.watchers.len(),
        })
    }

    /// Cancels pending reconciliation work. Open sessions stay open on
    /// disk so the next boot can resume them.
    pub async fn shutdown(&self) {
        let rooms: Vec<_> = self.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            room.lock().await.cancel_reconcile();
        }
    }

    /// Looks a room up, creating its entry on first sight.
    pub(crate) async fn room_entry(&self, room_id: &str) -> Arc<Mutex<RoomState>> {
        let mut rooms = self.rooms.lock().await;
        rooms.entry(room_id.to_string()).or_default().clone()
    }

    pub(crate) async fn existing_room(&self, room_id: &str) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    /// Closes the room's open session, if any: pays out watchers who
    /// joined by the halfway mark, closes their windows, and stamps the
    /// session row. Reward failures are isolated per watcher; the
    /// session and window writes propagate.
    pub(crate) async fn close_open_session(
        &self,
        room_id: &str,
        state: &mut RoomState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(open) = state.open.take() else {
            return Ok(());
        };
        state.cancel_reconcile();

        let halfway = open.halfway(now);
        let watchers = std::mem::take(&mut state.watchers);

        let mut rewarded = 0usize;
        let mut total_paid = 0i64;
        for (username, joined_at) in &watchers {
            if *joined_at > halfway {
                debug!("{username} joined session {} after halfway; no reward", open.id);
                continue;
            }

            let amount = {
                let mut rng = rand::thread_rng();
                self.settings.reward.draw(&mut rng)
            };

            if let Err(err) = self.ledger.credit(username, amount).await {
                error!("Failed to credit {username} for session {}: {err}", open.id);
                continue;
            }
            match self.db.mark_watcher_rewarded(open.id, username, amount).await {
                Ok(()) => {
                    rewarded += 1;
                    total_paid += amount;
                }
                Err(err) => {
                    error!(
                        "Credited {username} but failed to record reward for session {}: {err}",
                        open.id
                    );
                }
            }
        }

        self.db.close_active_watchers(open.id, now).await?;
        let duration_ms = (now - open.started_at).num_milliseconds().max(0) as u64;
        self.db.close_session(open.id, now, duration_ms).await?;

        info!(
            "Session {} closed in {room_id}: {} watchers, {rewarded} rewarded, {total_paid} paid",
            open.id,
            watchers.len(),
        );

        Ok(())
    }

    pub(crate) fn filter_members(&self, members: HashSet<String>) -> HashSet<String> {
        members
            .into_iter()
            .filter(|name| !self.directory.is_system_user(name))
            .collect()
    }
}
