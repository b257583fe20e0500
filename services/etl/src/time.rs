//! Time Normalizer and canonical timestamp keys.
//!
//! Every appointment timestamp in the warehouse goes through
//! `normalize_time` + `time_key`. The time dimension and the fact table both
//! call these, never their own formatting.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::error::TransformError;
use crate::source::SqlValue;

/// Format of the time dimension key.
pub const TIME_KEY_FORMAT: &str = "%Y%m%d%H%M%S";

const SECONDS_PER_DAY: i64 = 86_400;
const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Time-of-day value in one of the shapes the source produces.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    SinceMidnight(TimeDelta),
    TimeOfDay(NaiveTime),
    Text(String),
    /// Anything else; carries a description for the diagnostic.
    Other(String),
}

impl From<&SqlValue> for RawTime {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Interval(delta) => RawTime::SinceMidnight(*delta),
            SqlValue::Time(time) => RawTime::TimeOfDay(*time),
            SqlValue::Text(text) => RawTime::Text(text.clone()),
            other => RawTime::Other(format!("{} value {}", other.kind(), other)),
        }
    }
}

/// Convert any accepted time shape into a canonical time of day.
///
/// Intervals keep only their within-day seconds: 25h maps to 01:00:00 and
/// -1h to 23:00:00. Sub-second precision is dropped in every shape.
pub fn normalize_time(raw: &RawTime) -> Result<NaiveTime, TransformError> {
    match raw {
        RawTime::SinceMidnight(delta) => {
            let seconds = delta.num_seconds().rem_euclid(SECONDS_PER_DAY);
            // rem_euclid keeps the value inside one day
            NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0).ok_or_else(|| {
                TransformError::UnparseableTime {
                    value: delta.to_string(),
                }
            })
        }
        RawTime::TimeOfDay(time) => whole_seconds(*time, &time.to_string()),
        RawTime::Text(text) => NaiveTime::parse_from_str(text.trim(), "%H:%M:%S")
            .map_err(|_| TransformError::UnparseableTime {
                value: text.clone(),
            })
            .and_then(|time| whole_seconds(time, text)),
        RawTime::Other(description) => Err(TransformError::UnparseableTime {
            value: description.clone(),
        }),
    }
}

/// Drop sub-second precision. A leap second (`23:59:60`) has no `YYYYMMDDHHMMSS`
/// form and is rejected.
fn whole_seconds(time: NaiveTime, value: &str) -> Result<NaiveTime, TransformError> {
    if time.nanosecond() >= NANOS_PER_SECOND {
        return Err(TransformError::UnparseableTime {
            value: value.to_string(),
        });
    }
    Ok(time.with_nanosecond(0).unwrap_or(time))
}

/// Combine an appointment date with its raw time into a full timestamp.
pub fn appointment_timestamp(
    date: NaiveDate,
    raw: &RawTime,
) -> Result<NaiveDateTime, TransformError> {
    Ok(date.and_time(normalize_time(raw)?))
}

/// Canonical `YYYYMMDDHHMMSS` key, business and surrogate key of the time dimension.
pub fn time_key(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIME_KEY_FORMAT).to_string()
}

/// Calendar attributes stored on a time dimension row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarParts {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub month_name: String,
    pub weekday_name: String,
}

impl CalendarParts {
    /// Month and weekday names use chrono's default (English) names.
    pub fn of(timestamp: &NaiveDateTime) -> Self {
        Self {
            date: timestamp.date(),
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
            hour: timestamp.hour(),
            minute: timestamp.minute(),
            second: timestamp.second(),
            month_name: timestamp.format("%B").to_string(),
            weekday_name: timestamp.format("%A").to_string(),
        }
    }
}
