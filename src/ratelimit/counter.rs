//! Rate limit periods and counter entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::clock::Timestamp;

/// Longest accepted window, a little over 136 years.
const MAX_PERIOD_SECS: u64 = u32::MAX as u64;

/// Unit of a rate limit period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }

    /// Parse a unit suffix (`s`, `m`, `h`, `d`).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(TimeUnit::Second),
            "m" => Some(TimeUnit::Minute),
            "h" => Some(TimeUnit::Hour),
            "d" => Some(TimeUnit::Day),
            _ => None,
        }
    }

    /// The suffix used in configuration.
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
        }
    }
}

/// Length of a rate limit window, written as `<amount><unit>` (e.g. `1m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    amount: u64,
    unit: TimeUnit,
}

impl Period {
    /// Create a period of `amount` units. `amount` must be positive and the
    /// period no longer than `u32::MAX` seconds.
    pub fn new(amount: u64, unit: TimeUnit) -> Option<Self> {
        let secs = amount.checked_mul(unit.duration().as_secs())?;
        (amount > 0 && secs <= MAX_PERIOD_SECS).then_some(Self { amount, unit })
    }

    /// Get the length of the window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.amount * self.unit.duration().as_secs())
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("period '{}' has no unit (expected s, m, h or d)", s))?;
        let (digits, suffix) = s.split_at(split);

        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("period '{}' must start with a positive integer", s))?;
        let unit = TimeUnit::from_suffix(suffix)
            .ok_or_else(|| format!("period '{}' has unknown unit '{}'", s, suffix))?;

        if amount == 0 {
            return Err(format!("period '{}' must be greater than zero", s));
        }
        Period::new(amount, unit).ok_or_else(|| {
            format!("period '{}' exceeds the maximum of {}s", s, MAX_PERIOD_SECS)
        })
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// State of one counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Requests counted in this window, including denied ones
    pub count: u64,
    /// When the window opened
    pub window_start: Timestamp,
    /// When the window closes; the entry is dead from this instant on
    pub window_end: Timestamp,
}

impl CounterEntry {
    /// Open a window at `now` holding its first hit.
    pub fn first_hit(now: Timestamp, window: Duration) -> Self {
        Self {
            count: 1,
            window_start: now,
            window_end: now + window,
        }
    }

    /// Whether the window is still open at `now`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.window_end
    }

    /// Get the duration until the window resets.
    pub fn duration_until_reset(&self, now: Timestamp) -> Duration {
        self.window_end.saturating_duration_since(now)
    }
}
