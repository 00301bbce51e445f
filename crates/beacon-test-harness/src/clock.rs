//! A wall clock that follows tokio's (possibly paused) virtual time.

use beacon_core::clock::Clock;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

/// Wall clock anchored at `origin` when created and advanced by tokio time.
///
/// Under `#[tokio::test(start_paused = true)]` the clock moves only as the
/// runtime auto-advances through sleeps, so minute alignment and schedule
/// offsets run instantly and deterministically.
#[derive(Debug, Clone)]
pub struct PausedClock {
    origin: DateTime<Utc>,
    start: Instant,
}

impl PausedClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        PausedClock {
            origin,
            start: Instant::now(),
        }
    }

    /// Convenience constructor from calendar fields (UTC).
    ///
    /// # Panics
    ///
    /// Panics if the fields do not form a valid date-time.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        let origin = Utc
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .expect("valid calendar date-time");
        Self::starting_at(origin)
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}
