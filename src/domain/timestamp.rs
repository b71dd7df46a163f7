use std::error::Error;
use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::macros::{format_description, time};
use time::{Date, OffsetDateTime, Time, UtcOffset};

/// Which end of a window a bare calendar date stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    Start,
    End,
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn format_rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .expect("RFC3339 formatting for a UTC timestamp should never fail")
}

/// Accepts full RFC 3339 timestamps or `YYYY-MM-DD`. Results are UTC.
pub fn parse_timestamp(raw: &str, bound: DateBound) -> Result<OffsetDateTime, TimestampError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimestampError {
            value: raw.to_string(),
        });
    }
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }

    let date = Date::parse(trimmed, format_description!("[year]-[month]-[day]")).map_err(|_| {
        TimestampError {
            value: raw.to_string(),
        }
    })?;
    let clock = match bound {
        DateBound::Start => Time::MIDNIGHT,
        DateBound::End => time!(23:59:59),
    };
    Ok(date.with_time(clock).assume_utc())
}

pub fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampError {
    value: String,
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid timestamp '{}': expected RFC3339 or YYYY-MM-DD",
            self.value
        )
    }
}

impl Error for TimestampError {}
