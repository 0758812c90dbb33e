//! Ledger clock. Every "now" in the engine flows through a `Clock`,
//! so settlement windows and payout schedules are reproducible in tests.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use std::sync::{Arc, RwLock};

pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A settable clock. Clones share the same instant, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    instant: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    pub fn at(instant: Timestamp) -> Self {
        Self {
            instant: Arc::new(RwLock::new(instant)),
        }
    }

    pub fn set(&self, instant: Timestamp) {
        let mut guard = self.instant.write().unwrap_or_else(|e| e.into_inner());
        *guard = instant;
    }

    /// Move the clock forward. Returns the new instant.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let mut guard = self.instant.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
        *guard
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.instant.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::at(start);
        let handle = clock.clone();

        handle.advance(Duration::days(3));
        assert_eq!(clock.now(), start + Duration::days(3));

        handle.set(start);
        assert_eq!(clock.now(), start);
    }
}
