use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::RewardPolicy;

/// Engine tunables. Loaded from a JSON file the host points at; a
/// missing file yields the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Open sessions older than this at boot are abandoned instead of
    /// resumed.
    pub stale_session_max_age_secs: u64,
    /// Delays between scheduled reconciliation attempts after a session
    /// opens.
    pub reconcile_delays_secs: Vec<u64>,
    pub reward: RewardPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stale_session_max_age_secs: 2 * 60 * 60,
            reconcile_delays_secs: vec![2, 4, 8],
            reward: RewardPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))
    }
}
