//! Human-readable time spans: `"2d"`, `"1d 12h"`, `"90m"`, `"30m-6h"`.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{Result, ShuffleError};

/// Parse a span such as `"2h"`, `"1d 30m"`, `"1w2d"` or `"500s"`.
///
/// Units: `w`, `d`, `h`, `m`, `s`. A bare integer is a number of days.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err(ShuffleError::Configuration("duration is empty".into()));
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        let days: i64 = text
            .parse()
            .map_err(|_| invalid_duration(input))?;
        return Duration::try_days(days).ok_or_else(|| invalid_duration(input));
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;
    for c in text.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '\t' => {}
            'w' | 'd' | 'h' | 'm' | 's' => {
                if digits.is_empty() {
                    return Err(invalid_duration(input));
                }
                let value: i64 = digits.parse().map_err(|_| invalid_duration(input))?;
                let unit = match c {
                    'w' => 604_800,
                    'd' => 86_400,
                    'h' => 3_600,
                    'm' => 60,
                    _ => 1,
                };
                total = value
                    .checked_mul(unit)
                    .and_then(|secs| total.checked_add(secs))
                    .ok_or_else(|| invalid_duration(input))?;
                digits.clear();
                saw_unit = true;
            }
            _ => return Err(invalid_duration(input)),
        }
    }
    if !digits.is_empty() || !saw_unit {
        return Err(invalid_duration(input));
    }
    Duration::try_seconds(total).ok_or_else(|| invalid_duration(input))
}

fn invalid_duration(input: &str) -> ShuffleError {
    ShuffleError::Configuration(format!(
        "invalid duration '{input}' (examples: '2h', '1d 30m', '1w')"
    ))
}

/// Parse a jitter range `"<min>-<max>"` into inclusive gap bounds.
pub fn parse_jitter(input: &str) -> Result<(Duration, Duration)> {
    let (lo, hi) = input.split_once('-').ok_or_else(|| {
        ShuffleError::Configuration(format!(
            "invalid jitter '{input}': expected '<min>-<max>', e.g. '30m-6h'"
        ))
    })?;
    let lo = parse_duration(lo)?;
    let hi = parse_duration(hi)?;
    if lo > hi {
        return Err(ShuffleError::Configuration(format!(
            "invalid jitter '{input}': minimum exceeds maximum"
        )));
    }
    if hi <= Duration::zero() {
        return Err(ShuffleError::Configuration(format!(
            "invalid jitter '{input}': maximum gap must be positive"
        )));
    }
    Ok((lo, hi))
}

/// Parse a configured start date: `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_start_date(input: &str) -> Result<DateTime<Utc>> {
    let text = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            ShuffleError::Configuration(format!(
                "invalid start_date '{input}': expected YYYY-MM-DD or RFC 3339"
            ))
        })
}
