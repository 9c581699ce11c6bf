//! Clock abstraction
//!
//! Window resets and breaker deadlines are calendar-driven, so time is
//! injected rather than read ambiently. Tests drive a `ManualClock`.

use chrono::{DateTime, Days, TimeZone, Utc};
use std::sync::RwLock;

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used at runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic boundary tests
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given instant
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = instant;
        }
    }

    /// Move the clock forward
    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// First midnight strictly after the given instant (UTC)
///
/// Daily windows reset here, and an open circuit breaker schedules its
/// recovery for the start of the next trading day.
pub fn next_midnight(after: DateTime<Utc>) -> DateTime<Utc> {
    let next_day = after.date_naive() + Days::new(1);
    match next_day.and_hms_opt(0, 0, 0) {
        Some(dt) => Utc.from_utc_datetime(&dt),
        None => after + chrono::Duration::days(1),
    }
}
