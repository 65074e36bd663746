//! Tunables of the realtime subsystem.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::RetryPolicy;

/// Configuration shared by the connection manager and the typing controller.
///
/// Every field has a default, so a partial JSON document is enough to
/// override a single value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Pre-connection probe timeout
    pub probe_timeout_ms: u64,
    /// How long to wait for the transport to report "subscribed"
    pub subscribe_timeout_ms: u64,
    /// Interval between keep-alive broadcasts while connected
    pub heartbeat_interval_ms: u64,
    /// Inactivity after which `typing:stop` is sent
    pub typing_debounce_ms: u64,
    /// Display name attached to messages sent by this visitor
    pub sender_name: String,
    pub retry: RetryPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            subscribe_timeout_ms: 15_000,
            heartbeat_interval_ms: 25_000,
            typing_debounce_ms: 1_000,
            sender_name: "Visitor".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RealtimeConfig {
    /// Parse overrides from a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }
}
