// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Date/time normalization
//!
//! All date-typed values reach the evaluator through [`normalize_date_time`], which
//! tries each supported representation in a fixed order; the first valid parse wins.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use std::time::SystemTime;

use super::value::Value;
use crate::error::{ExpressionError, Result};

/// Input accepted by the normalization chain
#[derive(Debug, Clone, Copy)]
pub enum DateInput<'a> {
    /// Already-typed date-time
    Typed(DateTime<FixedOffset>),
    /// Native platform time
    Native(SystemTime),
    /// Text in one of the supported formats
    Text(&'a str),
    /// Milliseconds since the Unix epoch
    Millis(f64),
}

impl<'a> DateInput<'a> {
    /// Map a runtime value onto a date input, if it has a date-like shape
    pub fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::DateTime(dt) => Some(DateInput::Typed(*dt)),
            Value::String(s) => Some(DateInput::Text(s)),
            Value::Number(n) => Some(DateInput::Millis(*n)),
            _ => None,
        }
    }
}

const NAIVE_ISO_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
];

const SQL_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Normalize any supported representation to a fixed-offset date-time
///
/// Order: typed passthrough, native time, ISO-8601, HTTP-date, RFC 2822, SQL
/// timestamp, epoch milliseconds. Naive forms are read as UTC.
pub fn normalize_date_time(input: DateInput<'_>) -> Result<DateTime<FixedOffset>> {
    match input {
        DateInput::Typed(dt) => Ok(dt),
        DateInput::Native(time) => Ok(DateTime::<Utc>::from(time).fixed_offset()),
        DateInput::Millis(ms) => from_millis(ms).ok_or_else(|| invalid(&ms.to_string())),
        DateInput::Text(text) => parse_text(text.trim()).ok_or_else(|| invalid(text)),
    }
}

/// Normalize a runtime value
pub fn value_to_date_time(value: &Value) -> Result<DateTime<FixedOffset>> {
    DateInput::from_value(value)
        .ok_or_else(|| invalid(&value.to_js_string()))
        .and_then(normalize_date_time)
}

fn parse_text(text: &str) -> Option<DateTime<FixedOffset>> {
    parse_iso(text)
        .or_else(|| parse_http_date(text))
        .or_else(|| DateTime::parse_from_rfc2822(text).ok())
        .or_else(|| parse_sql(text))
        .or_else(|| parse_millis_text(text))
}

fn parse_iso(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in NAIVE_ISO_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}

fn parse_http_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let stripped = text.strip_suffix(" GMT")?;
    NaiveDateTime::parse_from_str(stripped, "%a, %d %b %Y %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

fn parse_sql(text: &str) -> Option<DateTime<FixedOffset>> {
    SQL_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

fn parse_millis_text(text: &str) -> Option<DateTime<FixedOffset>> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse::<f64>().ok().and_then(from_millis)
}

fn from_millis(ms: f64) -> Option<DateTime<FixedOffset>> {
    if !ms.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(ms.trunc() as i64)
        .single()
        .map(|dt| dt.fixed_offset())
}

fn invalid(input: &str) -> ExpressionError {
    ExpressionError::InvalidDate {
        input: input.to_string(),
    }
}

/// Calendar unit used by `plus`, `minus`, `startOf`, `diff`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    /// Years
    Year,
    /// Months
    Month,
    /// Weeks (ISO, Monday start)
    Week,
    /// Days
    Day,
    /// Hours
    Hour,
    /// Minutes
    Minute,
    /// Seconds
    Second,
    /// Milliseconds
    Millisecond,
}

impl DateUnit {
    /// Parse singular or plural unit names
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower == "ms" {
            return Some(DateUnit::Millisecond);
        }
        let unit = match lower.strip_suffix('s').unwrap_or(&lower) {
            "year" | "y" => DateUnit::Year,
            "month" => DateUnit::Month,
            "week" | "w" => DateUnit::Week,
            "day" | "d" => DateUnit::Day,
            "hour" | "h" => DateUnit::Hour,
            "minute" | "min" => DateUnit::Minute,
            "second" | "sec" => DateUnit::Second,
            "millisecond" | "milli" => DateUnit::Millisecond,
            _ => return None,
        };
        Some(unit)
    }
}

/// Shift a date by `amount` units; fractional amounts apply to time units only
pub fn add_duration(
    dt: DateTime<FixedOffset>,
    amount: f64,
    unit: DateUnit,
) -> Option<DateTime<FixedOffset>> {
    let millis = |factor: f64| Duration::try_milliseconds((amount * factor).round() as i64);
    match unit {
        DateUnit::Year => add_months(dt, amount.trunc() as i64 * 12),
        DateUnit::Month => add_months(dt, amount.trunc() as i64),
        DateUnit::Week => dt.checked_add_signed(millis(7.0 * 86_400_000.0)?),
        DateUnit::Day => dt.checked_add_signed(millis(86_400_000.0)?),
        DateUnit::Hour => dt.checked_add_signed(millis(3_600_000.0)?),
        DateUnit::Minute => dt.checked_add_signed(millis(60_000.0)?),
        DateUnit::Second => dt.checked_add_signed(millis(1_000.0)?),
        DateUnit::Millisecond => dt.checked_add_signed(millis(1.0)?),
    }
}

fn add_months(dt: DateTime<FixedOffset>, months: i64) -> Option<DateTime<FixedOffset>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        dt.checked_add_months(magnitude)
    } else {
        dt.checked_sub_months(magnitude)
    }
}

/// Truncate to the start of the unit
pub fn start_of(dt: DateTime<FixedOffset>, unit: DateUnit) -> Option<DateTime<FixedOffset>> {
    let offset = *dt.offset();
    let date = dt.date_naive();
    let naive = match unit {
        DateUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_time(NaiveTime::MIN),
        DateUnit::Month => {
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_time(NaiveTime::MIN)
        }
        DateUnit::Week => {
            let back = i64::from(date.weekday().num_days_from_monday());
            (date - Duration::days(back)).and_time(NaiveTime::MIN)
        }
        DateUnit::Day => date.and_time(NaiveTime::MIN),
        DateUnit::Hour => date.and_hms_opt(dt.hour(), 0, 0)?,
        DateUnit::Minute => date.and_hms_opt(dt.hour(), dt.minute(), 0)?,
        DateUnit::Second => date.and_hms_opt(dt.hour(), dt.minute(), dt.second())?,
        DateUnit::Millisecond => return Some(dt),
    };
    offset.from_local_datetime(&naive).single()
}

/// Last millisecond of the unit
pub fn end_of(dt: DateTime<FixedOffset>, unit: DateUnit) -> Option<DateTime<FixedOffset>> {
    if unit == DateUnit::Millisecond {
        return Some(dt);
    }
    let start = start_of(dt, unit)?;
    let next = add_duration(start, 1.0, unit)?;
    next.checked_sub_signed(Duration::milliseconds(1))
}

/// Difference `a - b` expressed in `unit` (months and years are calendar-based)
pub fn diff(a: DateTime<FixedOffset>, b: DateTime<FixedOffset>, unit: DateUnit) -> f64 {
    let millis = (a - b).num_milliseconds() as f64;
    match unit {
        DateUnit::Year => month_diff(a, b) as f64 / 12.0,
        DateUnit::Month => month_diff(a, b) as f64,
        DateUnit::Week => millis / (7.0 * 86_400_000.0),
        DateUnit::Day => millis / 86_400_000.0,
        DateUnit::Hour => millis / 3_600_000.0,
        DateUnit::Minute => millis / 60_000.0,
        DateUnit::Second => millis / 1_000.0,
        DateUnit::Millisecond => millis,
    }
}

fn month_diff(a: DateTime<FixedOffset>, b: DateTime<FixedOffset>) -> i64 {
    let months = i64::from(a.year() - b.year()) * 12 + i64::from(a.month()) - i64::from(b.month());
    // Drop the last month when it is not complete yet
    let b_shifted = add_months(b, months);
    match b_shifted {
        Some(shifted) if months > 0 && shifted > a => months - 1,
        Some(shifted) if months < 0 && shifted < a => months + 1,
        _ => months,
    }
}

/// Read one calendar component
pub fn component(dt: DateTime<FixedOffset>, unit: DateUnit) -> f64 {
    match unit {
        DateUnit::Year => f64::from(dt.year()),
        DateUnit::Month => f64::from(dt.month()),
        DateUnit::Week => f64::from(dt.iso_week().week()),
        DateUnit::Day => f64::from(dt.day()),
        DateUnit::Hour => f64::from(dt.hour()),
        DateUnit::Minute => f64::from(dt.minute()),
        DateUnit::Second => f64::from(dt.second()),
        DateUnit::Millisecond => f64::from(dt.timestamp_subsec_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2024-03-05T10:20:30Z", 1_709_634_030_000)]
    #[case("2024-03-05T10:20:30.500+00:00", 1_709_634_030_500)]
    #[case("2024-03-05T10:20:30", 1_709_634_030_000)]
    #[case("2024-03-05", 1_709_596_800_000)]
    #[case("Tue, 05 Mar 2024 10:20:30 GMT", 1_709_634_030_000)]
    #[case("Tue, 5 Mar 2024 10:20:30 +0000", 1_709_634_030_000)]
    #[case("2024-03-05 10:20:30", 1_709_634_030_000)]
    #[case("1709634030000", 1_709_634_030_000)]
    fn text_forms_normalize(#[case] input: &str, #[case] millis: i64) {
        let dt = normalize_date_time(DateInput::Text(input)).unwrap();
        assert_eq!(dt.timestamp_millis(), millis);
    }

    #[test]
    fn typed_input_passes_through() {
        let dt = DateTime::parse_from_rfc3339("2020-01-01T00:00:00+02:00").unwrap();
        assert_eq!(normalize_date_time(DateInput::Typed(dt)).unwrap(), dt);
    }

    #[test]
    fn native_time_is_accepted() {
        let dt = normalize_date_time(DateInput::Native(SystemTime::UNIX_EPOCH)).unwrap();
        assert_eq!(dt.timestamp_millis(), 0);
    }

    #[test]
    fn epoch_millis_number() {
        let dt = normalize_date_time(DateInput::Millis(86_400_000.0)).unwrap();
        assert_eq!(dt.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn exhausted_forms_fail_with_invalid_date() {
        let err = normalize_date_time(DateInput::Text("not a date")).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::InvalidDate {
                input: "not a date".into()
            }
        );
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        let dt = normalize_date_time(DateInput::Text("2024-01-31")).unwrap();
        let shifted = add_duration(dt, 1.0, DateUnit::Month).unwrap();
        assert_eq!(shifted.date_naive().to_string(), "2024-02-29");
    }

    #[test]
    fn start_and_end_of_month() {
        let dt = normalize_date_time(DateInput::Text("2024-02-10T12:00:00Z")).unwrap();
        assert_eq!(
            start_of(dt, DateUnit::Month).unwrap().to_rfc3339(),
            "2024-02-01T00:00:00+00:00"
        );
        assert_eq!(
            end_of(dt, DateUnit::Month).unwrap().timestamp_millis(),
            normalize_date_time(DateInput::Text("2024-03-01"))
                .unwrap()
                .timestamp_millis()
                - 1
        );
    }

    #[test]
    fn calendar_month_difference() {
        let a = normalize_date_time(DateInput::Text("2024-03-15")).unwrap();
        let b = normalize_date_time(DateInput::Text("2024-01-20")).unwrap();
        assert_eq!(diff(a, b, DateUnit::Month), 1.0);
        assert_eq!(diff(a, b, DateUnit::Day), 55.0);
    }

    #[test]
    fn unit_names() {
        assert_eq!(DateUnit::parse("Days"), Some(DateUnit::Day));
        assert_eq!(DateUnit::parse("minutes"), Some(DateUnit::Minute));
        assert_eq!(DateUnit::parse("ms"), Some(DateUnit::Millisecond));
        assert_eq!(DateUnit::parse("fortnight"), None);
    }
}
