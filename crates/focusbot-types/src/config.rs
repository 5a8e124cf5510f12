//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the session engine, loaded from `focusbot.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reconciliation loop tick, in seconds.
    pub tick_secs: u64,
    /// Maximum gap since a session's last recorded progress before it is
    /// force-ended on restart instead of resumed.
    pub staleness_threshold_secs: u64,
    /// SQLite database URL.
    pub database_url: Option<String>,
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: 20,
            staleness_threshold_secs: 3600,
            database_url: None,
        }
    }
}
