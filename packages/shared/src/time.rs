//! Time-related utilities with clock abstraction for testability.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current Unix timestamp in UTC (milliseconds)
    fn now_epoch_millis(&self) -> i64;

    /// Get current Unix timestamp in UTC (seconds)
    fn now_epoch_seconds(&self) -> i64 {
        self.now_epoch_millis().div_euclid(1000)
    }
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_millis(&self) -> i64 {
        get_utc_timestamp()
    }
}

/// Fixed clock implementation for testing
///
/// Returns the same time until it is moved with [`FixedClock::advance_secs`]
/// or [`FixedClock::set_millis`].
#[derive(Debug, Default)]
pub struct FixedClock {
    fixed_time: AtomicI64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: AtomicI64::new(fixed_time_millis),
        }
    }

    /// Create a new fixed clock at the given Unix time in seconds
    pub fn at_epoch_seconds(seconds: i64) -> Self {
        Self::new(seconds.saturating_mul(1000))
    }

    /// Move the clock forward by `seconds`
    pub fn advance_secs(&self, seconds: i64) {
        self.fixed_time
            .fetch_add(seconds.saturating_mul(1000), Ordering::SeqCst);
    }

    /// Jump the clock to an absolute timestamp in milliseconds
    pub fn set_millis(&self, millis: i64) {
        self.fixed_time.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_epoch_millis(&self) -> i64 {
        self.fixed_time.load(Ordering::SeqCst)
    }
}

/// Get current Unix timestamp in UTC (milliseconds)
pub fn get_utc_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix timestamp (milliseconds) to UTC RFC 3339 format
///
/// Out-of-range timestamps are rendered as the Unix epoch.
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> String {
    millis_to_datetime(timestamp_millis).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert Unix timestamp (milliseconds) to a `DateTime<Utc>`
pub fn millis_to_datetime(timestamp_millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Format a point in time as `HH:MM:SS` (UTC) for terminal display
pub fn format_clock_time(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}
