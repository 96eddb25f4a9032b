mod bootstrap;
mod controller;
mod reconcile;
pub mod reward;
pub mod state;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

pub use controller::{RoomSnapshot, WatchEngine};
pub use reward::RewardPolicy;

/// Ground truth about who is in a room right now. Implemented by the
/// chat transport layer.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Current members of a room, unfiltered; the engine drops system
    /// identities via `is_system_user`.
    async fn members(&self, room_id: &str) -> Result<HashSet<String>>;

    /// Whether a username belongs to the server, a bot, or some other
    /// identity that can never be a watcher.
    fn is_system_user(&self, username: &str) -> bool;
}

/// The economy ledger. The engine calls `credit` at most once per
/// eligible watcher per session, so implementations need not dedupe.
#[async_trait]
pub trait RewardSink: Send + Sync {
    async fn credit(&self, username: &str, amount: i64) -> Result<()>;
}
