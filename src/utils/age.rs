// src/utils/age.rs

//! Parsing of upstream timestamps.
//!
//! Upstream history pages render recent transactions with a relative age
//! (`3 hrs 2 mins ago`, `12 secs ago`) and older ones with an absolute stamp
//! (`2022/09/24 18:55:42`). Both are resolved against the capture time.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use thiserror::Error;

static AGE_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b")
        .expect("age pattern is valid")
});

const ABSOLUTE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgeParseError {
    #[error("empty timestamp")]
    Empty,

    #[error("unrecognized timestamp: {0:?}")]
    Unrecognized(String),

    #[error("timestamp out of range: {0:?}")]
    OutOfRange(String),
}

/// Parse a relative age such as `3 hrs 2 mins ago` into a duration.
pub fn parse_relative_age(text: &str) -> Result<Duration, AgeParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AgeParseError::Empty);
    }

    let mut total: u64 = 0;
    let mut matched = false;
    for caps in AGE_PART.captures_iter(trimmed) {
        matched = true;
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| AgeParseError::OutOfRange(trimmed.to_string()))?;
        let unit = caps[2].to_ascii_lowercase();
        let scale = match unit.chars().next() {
            Some('d') => 86_400,
            Some('h') => 3_600,
            Some('m') => 60,
            _ => 1,
        };
        total = value
            .checked_mul(scale)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| AgeParseError::OutOfRange(trimmed.to_string()))?;
    }

    if !matched {
        return Err(AgeParseError::Unrecognized(trimmed.to_string()));
    }
    Ok(Duration::from_secs(total))
}

/// Resolve a relative or absolute timestamp string against `now`.
///
/// Absolute stamps carry no zone and are read as UTC.
pub fn resolve_timestamp(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, AgeParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AgeParseError::Empty);
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, ABSOLUTE_FORMAT) {
        return Ok(naive.and_utc());
    }

    let age = parse_relative_age(trimmed)?;
    let delta = TimeDelta::from_std(age)
        .map_err(|_| AgeParseError::OutOfRange(trimmed.to_string()))?;
    now.checked_sub_signed(delta)
        .ok_or_else(|| AgeParseError::OutOfRange(trimmed.to_string()))
}

/// Convert upstream epoch seconds (possibly fractional) into an instant.
pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos)
}
