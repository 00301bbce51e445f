//! Wall-clock source used for minute alignment and schedule offsets.

use chrono::{DateTime, Utc};

/// Source of the current UTC wall-clock time.
///
/// The schedule engine reads the clock only through this trait so that
/// alignment and offset waits can run against virtual time in tests.
pub trait Clock: Send + Sync {
    /// The current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// The current time as whole seconds since the Unix epoch.
    fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
