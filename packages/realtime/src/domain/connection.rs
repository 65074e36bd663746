//! Connection state machine vocabulary and retry policy.
//!
//! These are pure types; the connection manager drives them.

use std::{fmt, time::Duration};

use serde::Deserialize;

/// Largest exponent applied to the base delay; keeps the shift from overflowing.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Lifecycle state of one connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Subscribing,
    Connected,
    Retrying,
    Fallback,
    Closed,
}

impl ConnectionState {
    /// Check whether the state machine allows moving from `self` to `next`.
    ///
    /// `Closed` is reachable from every state (explicit disconnect).
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Closed {
            return true;
        }

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Retrying)
                | (Connecting, Fallback)
                | (Authenticating, Subscribing)
                | (Authenticating, Retrying)
                | (Authenticating, Fallback)
                | (Subscribing, Connected)
                | (Subscribing, Retrying)
                | (Subscribing, Fallback)
                | (Connected, Retrying)
                | (Connected, Fallback)
                | (Connected, Connecting)
                | (Retrying, Connecting)
                | (Retrying, Fallback)
                | (Fallback, Connecting)
                | (Closed, Connecting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Fallback => "fallback",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `on_connection_change`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    pub connected: bool,
    pub state: ConnectionState,
    /// Human-readable status line for the widget header
    pub status: String,
}

/// Exponential backoff policy: `base_delay * 2^retry_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// Check if another retry may be scheduled after `retry_count` retries.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry number `retry_count` (0-indexed).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u64 << retry_count.min(MAX_BACKOFF_EXPONENT);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}
