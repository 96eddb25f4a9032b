use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::engine::{
    state::{RoomState, ScheduledTask},
    RoomDirectory, RewardSink, WatchEngine,
};

impl<D, L> WatchEngine<D, L>
where
    D: RoomDirectory + 'static,
    L: RewardSink + 'static,
{
    /// A fresh userlist snapshot pushed by the transport. Runs a
    /// reconciliation pass immediately; once real membership data has
    /// produced at least one tracked watcher, any still-pending
    /// scheduled attempt is redundant and gets cancelled.
    pub async fn on_membership_snapshot(
        &self,
        room_id: &str,
        members: HashSet<String>,
    ) -> Result<()> {
        self.on_membership_snapshot_at(room_id, members, Utc::now())
            .await
    }

    pub async fn on_membership_snapshot_at(
        &self,
        room_id: &str,
        members: HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let members = self.filter_members(members);

        let Some(room) = self.existing_room(room_id).await else {
            return Ok(());
        };
        let mut state = room.lock().await;
        if state.open.is_none() {
            return Ok(());
        }

        self.reconcile_with_members(room_id, &mut state, members, now, "snapshot")
            .await?;

        if !state.watchers.is_empty() {
            state.cancel_reconcile();
        }

        Ok(())
    }

    /// Repairs the tracked watcher set against a membership set that
    /// has already been filtered of system identities. Members the
    /// engine never saw join are backfilled with the session's start
    /// time: a user discovered only here was most likely present all
    /// along, and assuming otherwise would cost them their reward.
    /// Tracked watchers missing from the set are marked departed.
    /// Running this twice with the same membership changes nothing.
    pub(crate) async fn reconcile_with_members(
        &self,
        room_id: &str,
        state: &mut RoomState,
        members: HashSet<String>,
        now: DateTime<Utc>,
        source: &str,
    ) -> Result<(usize, usize)> {
        let Some(open) = state.open.clone() else {
            return Ok((0, 0));
        };

        let mut added = 0usize;
        for member in &members {
            if state.watchers.contains_key(member) {
                continue;
            }
            self.db
                .insert_watcher(open.id, member, open.started_at)
                .await?;
            state.watchers.insert(member.clone(), open.started_at);
            added += 1;
        }

        let departed: Vec<String> = state
            .watchers
            .keys()
            .filter(|name| !members.contains(*name))
            .cloned()
            .collect();
        let removed = departed.len();
        for username in departed {
            self.db.mark_watcher_left(open.id, &username, now).await?;
            state.watchers.remove(&username);
        }

        if added > 0 || removed > 0 {
            info!(
                "Reconciliation ({source}) in {room_id}: {added} added, {removed} departed, {} tracked",
                state.watchers.len(),
            );
        } else {
            debug!("Reconciliation ({source}) in {room_id}: no changes");
        }

        Ok((added, removed))
    }

    /// Spawns the post-open attempt chain. Each attempt re-checks that
    /// the session it was scheduled for is still the room's open one,
    /// so a stray timer can never touch a later session.
    pub(crate) fn schedule_reconcile(&self, room_id: &str, session_id: i64) -> ScheduledTask {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let engine = self.clone();
        let room = room_id.to_string();
        let delays = self.settings.reconcile_delays_secs.clone();

        let handle = tokio::spawn(async move {
            for delay in delays {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }

                if let Err(err) = engine.run_scheduled_reconcile(&room, session_id).await {
                    error!("Scheduled reconciliation failed in {room}: {err}");
                }
            }
        });

        ScheduledTask::new(token, handle)
    }

    async fn run_scheduled_reconcile(&self, room_id: &str, session_id: i64) -> Result<()> {
        let members = self.directory.members(room_id).await?;
        let members = self.filter_members(members);
        let now = Utc::now();

        let Some(room) = self.existing_room(room_id).await else {
            return Ok(());
        };
        let mut state = room.lock().await;
        if state.open.as_ref().map(|open| open.id) != Some(session_id) {
            debug!("Dropping scheduled reconciliation for closed session {session_id}");
            return Ok(());
        }

        self.reconcile_with_members(room_id, &mut state, members, now, "scheduled")
            .await?;
        Ok(())
    }
}
