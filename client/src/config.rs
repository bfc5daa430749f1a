//! Tunables for the networking core, loadable from a JSON file

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::NetResult;

/// Exponential backoff for the signaling channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Failed reconnection attempts tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^(attempt-1), max)` for attempt >= 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub reconnect: ReconnectPolicy,
    /// Window after which every owned entity is re-sent even if clean
    pub sync_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub identity_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    /// Slots of a match we host
    pub match_slots: u8,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            sync_interval_ms: 500,
            ping_interval_ms: 1_000,
            identity_timeout_ms: 10_000,
            disconnect_timeout_ms: 3_000,
            match_slots: 4,
        }
    }
}

impl NetConfig {
    pub fn from_file(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}
