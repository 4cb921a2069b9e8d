//! ISO-8601 Durations
//!
//! Parses the duration subset used by BPMN timer definitions:
//! weeks (`P2W`), days and clock time (`P1DT2H30M`), and fractional
//! values (`PT0.1S`). Calendar units (years, months) are rejected because
//! their length depends on the anchor date.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ScheduleError;

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const SECONDS_PER_MINUTE: u128 = 60;
const SECONDS_PER_HOUR: u128 = 3_600;
const SECONDS_PER_DAY: u128 = 86_400;
const SECONDS_PER_WEEK: u128 = 604_800;

/// Parses an ISO-8601 duration such as `PT0.1S` or `P1DT12H`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use flowrunner::schedule::parse_duration;
///
/// assert_eq!(parse_duration("PT0.1S").unwrap(), Duration::from_millis(100));
/// assert_eq!(parse_duration("P1DT1H").unwrap(), Duration::from_secs(90_000));
/// ```
pub fn parse_duration(text: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidDuration(text.to_string());
    let body = text.trim().strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) if !time.is_empty() => (date, Some(time)),
        Some(_) => return Err(invalid()),
        None => (body, None),
    };

    let mut nanos: u128 = 0;
    for (value, unit) in components(date_part).ok_or_else(invalid)? {
        let seconds = match unit {
            'W' => SECONDS_PER_WEEK,
            'D' => SECONDS_PER_DAY,
            _ => return Err(invalid()),
        };
        nanos = value
            .scaled(seconds)
            .and_then(|n| nanos.checked_add(n))
            .ok_or_else(invalid)?;
    }
    if let Some(time) = time_part {
        for (value, unit) in components(time).ok_or_else(invalid)? {
            let seconds = match unit {
                'H' => SECONDS_PER_HOUR,
                'M' => SECONDS_PER_MINUTE,
                'S' => 1,
                _ => return Err(invalid()),
            };
            nanos = value
                .scaled(seconds)
                .and_then(|n| nanos.checked_add(n))
                .ok_or_else(invalid)?;
        }
    }

    let secs = u64::try_from(nanos / NANOS_PER_SECOND).map_err(|_| invalid())?;
    let subsec = (nanos % NANOS_PER_SECOND) as u32;
    let duration = Duration::new(secs, subsec);

    // Reject anything chrono cannot add to a timestamp
    chrono::Duration::from_std(duration).map_err(|_| invalid())?;
    Ok(duration)
}

/// Formats a duration in the canonical `PT<seconds>S` form.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        return format!("PT{}S", duration.as_secs());
    }
    let fraction = format!("{:09}", nanos);
    format!("PT{}.{}S", duration.as_secs(), fraction.trim_end_matches('0'))
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ScheduleError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ScheduleError::InvalidTimestamp(text.to_string()))
}

/// Formats a timestamp without losing sub-second precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Adds a duration to a timestamp, failing instead of wrapping.
pub fn advance(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, ScheduleError> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or(ScheduleError::Overflow)
}

/// A decimal number split into integer and fractional digits.
struct Decimal {
    whole: u128,
    fraction: u128,
    fraction_digits: u32,
}

impl Decimal {
    /// Converts `self * unit_seconds` to nanoseconds, or `None` on overflow.
    fn scaled(&self, unit_seconds: u128) -> Option<u128> {
        let unit_nanos = unit_seconds * NANOS_PER_SECOND;
        let whole = self.whole.checked_mul(unit_nanos)?;
        let fraction = self.fraction * unit_nanos / 10u128.pow(self.fraction_digits);
        whole.checked_add(fraction)
    }
}

/// Splits `1D12H` style text into `(value, unit)` pairs.
fn components(text: &str) -> Option<Vec<(Decimal, char)>> {
    let mut parts = Vec::new();
    let mut number = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
            continue;
        }
        if number.is_empty() {
            return None;
        }
        parts.push((parse_decimal(&number)?, c));
        number.clear();
    }

    if !number.is_empty() {
        return None;
    }
    Some(parts)
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let normalized = text.replace(',', ".");
    let (whole, fraction) = match normalized.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (normalized.as_str(), ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Nanosecond precision is all a timestamp can carry
    let fraction: String = fraction.chars().take(9).collect();
    let fraction_digits = fraction.len() as u32;
    let fraction = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };

    Some(Decimal {
        whole,
        fraction,
        fraction_digits,
    })
}
