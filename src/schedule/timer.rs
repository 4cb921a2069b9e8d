//! Timer Definitions and Occurrence State
//!
//! A timer either fires once ([`TimerOnce`]) or repeatedly on a fixed
//! interval ([`CycleSpec`]). Definitions are parsed when the process graph
//! is built; the mutable part of a running timer lives in [`TimerState`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::duration::{advance, format_duration, format_timestamp, parse_duration, parse_timestamp};
use crate::error::ScheduleError;

/// A timer that fires a single time.
///
/// Serialized as its ISO-8601 text (`"PT5M"` or an RFC 3339 date).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "String", into = "String")]
pub enum TimerOnce {
    /// Fires at an absolute instant
    At(DateTime<Utc>),
    /// Fires this long after the catching task starts waiting
    After(Duration),
}

impl TimerOnce {
    /// Parses either an RFC 3339 date or an ISO-8601 duration.
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        if text.trim_start().starts_with('P') {
            return parse_duration(text).map(Self::After);
        }
        parse_timestamp(text).map(Self::At)
    }

    /// Computes when the timer fires for a task activated at `activated`.
    pub fn due(&self, activated: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            Self::At(at) => Ok(*at),
            Self::After(delay) => advance(activated, *delay),
        }
    }
}

impl fmt::Display for TimerOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(at) => f.write_str(&format_timestamp(*at)),
            Self::After(delay) => f.write_str(&format_duration(*delay)),
        }
    }
}

impl TryFrom<String> for TimerOnce {
    type Error = ScheduleError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<TimerOnce> for String {
    fn from(timer: TimerOnce) -> Self {
        timer.to_string()
    }
}

/// A recurring timer: `R[n]/[start/]interval`.
///
/// `repeat` is `None` for unbounded recurrences (`R/PT1H`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "String", into = "String")]
pub struct CycleSpec {
    pub repeat: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub interval: Duration,
}

impl CycleSpec {
    /// Parses an ISO-8601 repeating interval.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use flowrunner::schedule::CycleSpec;
    ///
    /// let cycle = CycleSpec::parse("R2/PT0.1S").unwrap();
    /// assert_eq!(cycle.repeat, Some(2));
    /// assert_eq!(cycle.interval, Duration::from_millis(100));
    /// assert!(CycleSpec::parse("R0/PT1S").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidCycle(text.to_string());
        let parts: Vec<&str> = text.trim().split('/').collect();

        let (repeat_part, start, interval_part) = match parts.as_slice() {
            [repeat, interval] => (*repeat, None, *interval),
            [repeat, start, interval] => (*repeat, Some(parse_timestamp(start)?), *interval),
            _ => return Err(invalid()),
        };

        let count = repeat_part.strip_prefix('R').ok_or_else(invalid)?;
        let repeat = if count.is_empty() {
            None
        } else {
            let n: u32 = count.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(ScheduleError::ZeroRepeat(text.to_string()));
            }
            Some(n)
        };

        let interval = parse_duration(interval_part)?;
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval(text.to_string()));
        }

        Ok(Self {
            repeat,
            start,
            interval,
        })
    }

    /// First due instant for a task activated at `activated`.
    pub fn first_due(&self, activated: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self.start {
            Some(start) => Ok(start),
            None => advance(activated, self.interval),
        }
    }

    /// Returns true once `fired` occurrences use up the repeat bound.
    pub fn is_exhausted(&self, fired: u32) -> bool {
        self.repeat.is_some_and(|limit| fired >= limit)
    }
}

impl fmt::Display for CycleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("R")?;
        if let Some(n) = self.repeat {
            write!(f, "{}", n)?;
        }
        if let Some(start) = self.start {
            write!(f, "/{}", format_timestamp(start))?;
        }
        write!(f, "/{}", format_duration(self.interval))
    }
}

impl TryFrom<String> for CycleSpec {
    type Error = ScheduleError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<CycleSpec> for String {
    fn from(cycle: CycleSpec) -> Self {
        cycle.to_string()
    }
}

/// Mutable occurrence state of a waiting timer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// When the pending occurrence becomes due
    pub next_due: DateTime<Utc>,
    /// Occurrences fired before the pending one
    pub fired: u32,
}

impl TimerState {
    pub fn new(next_due: DateTime<Utc>) -> Self {
        Self { next_due, fired: 0 }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_due
    }

    /// State of the occurrence following this one.
    pub fn next(&self, interval: Duration) -> Result<Self, ScheduleError> {
        Ok(Self {
            next_due: advance(self.next_due, interval)?,
            fired: self.fired + 1,
        })
    }
}
