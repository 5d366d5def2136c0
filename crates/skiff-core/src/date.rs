//! Clocks and user-facing date formatting.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub trait UserDateFormatter: Send + Sync {
    fn short_format(&self, epoch_ms: i64) -> String;
    fn medium_format(&self, epoch_ms: i64) -> String;
    fn long_format(&self, epoch_ms: i64) -> String;
}

/// Formats dates in a fixed timezone with chrono patterns.
#[derive(Debug, Clone)]
pub struct ChronoDateFormatter {
    timezone: Tz,
}

impl ChronoDateFormatter {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    fn format(&self, epoch_ms: i64, pattern: &str) -> String {
        match self.timezone.timestamp_millis_opt(epoch_ms).single() {
            Some(dt) => dt.format(pattern).to_string(),
            None => epoch_ms.to_string(),
        }
    }
}

impl Default for ChronoDateFormatter {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl UserDateFormatter for ChronoDateFormatter {
    fn short_format(&self, epoch_ms: i64) -> String {
        self.format(epoch_ms, "%-m/%-d/%y, %-I:%M %p")
    }

    fn medium_format(&self, epoch_ms: i64) -> String {
        self.format(epoch_ms, "%b %-d, %Y, %-I:%M:%S %p")
    }

    fn long_format(&self, epoch_ms: i64) -> String {
        self.format(epoch_ms, "%B %-d, %Y at %-I:%M:%S %p %Z")
    }
}
