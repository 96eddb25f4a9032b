//! Watch-session tracking and rewards for multi-room chat services.
//!
//! The engine reconstructs "who was watching, and from when" out of
//! unreliable, unordered room events, and pays out at most once per
//! watcher per session. The chat transport, the economy ledger and the
//! command layer live in the hosting service; they talk to this crate
//! through [`WatchEngine`] and implement [`RoomDirectory`] and
//! [`RewardSink`].

pub mod db;
pub mod engine;
pub mod logging;
pub mod settings;

pub use db::{Database, WatchSession, Watcher};
pub use engine::{RewardPolicy, RoomDirectory, RoomSnapshot, RewardSink, WatchEngine};
pub use settings::EngineSettings;
