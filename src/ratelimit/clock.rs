//! Time sources for window accounting.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::ops::Add;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A point in time, measured as the offset from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Create a timestamp from an offset since the Unix epoch.
    pub const fn from_unix(offset: Duration) -> Self {
        Self(offset)
    }

    /// Create a timestamp from whole seconds since the Unix epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Offset since the Unix epoch.
    pub fn as_unix(&self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Round up to the next whole second.
    pub fn ceil_secs(&self) -> Timestamp {
        let secs = self.0.as_secs() + u64::from(self.0.subsec_nanos() > 0);
        Timestamp::from_secs(secs)
    }

    /// Convert to a UTC calendar time.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.as_secs() as i64, self.0.subsec_nanos())
            .unwrap_or_default()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs))
    }
}

/// Source of the current time.
///
/// Implementations must be monotonic and safe to call from any number of
/// tasks at once.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock anchored, monotonic clock.
///
/// The Unix offset is sampled once at construction; later readings advance
/// with [`Instant`], so adjustments of the system clock never move time
/// backwards.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin_unix: Duration,
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let origin_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            origin_unix,
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin_unix + self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
///
/// Used to drive window expiry deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
