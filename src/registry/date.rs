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

//! Date-time methods
//!
//! Format strings use the familiar token style (`yyyy-MM-dd HH:mm:ss`);
//! text inside single quotes is copied literally.

use chrono::{DateTime, Datelike, FixedOffset, Utc, Weekday};
use std::fmt::Write as _;

use super::{
    CallSite, DateMethod, ExtensionRegistry, MethodDoc, MethodImpl, arg, doc, num_arg,
    opt_str_arg, str_arg,
};
use crate::error::{ExpressionError, Result};
use crate::model::datetime::{self, DateUnit};
use crate::model::{Value, format_date_time, value_to_date_time};

const METHODS: &[(&str, DateMethod, MethodDoc)] = &[
    (
        "format",
        format,
        doc("format(pattern)", "Render with tokens like yyyy-MM-dd", "$now.format('yyyy-MM-dd')"),
    ),
    (
        "toFormat",
        format,
        doc("toFormat(pattern)", "Render with tokens like yyyy-MM-dd", "$now.toFormat('HH:mm')"),
    ),
    (
        "plus",
        plus,
        doc("plus(amount, unit)", "Add a duration", "$now.plus(1, 'days')"),
    ),
    (
        "minus",
        minus,
        doc("minus(amount, unit)", "Subtract a duration", "$now.minus({hours: 2})"),
    ),
    (
        "diff",
        diff,
        doc("diff(other, unit?)", "This date minus other, in unit", "$now.diff($today, 'hours')"),
    ),
    (
        "startOf",
        start_of,
        doc("startOf(unit)", "Beginning of the unit", "$now.startOf('month')"),
    ),
    (
        "endOf",
        end_of,
        doc("endOf(unit)", "Last millisecond of the unit", "$now.endOf('day')"),
    ),
    ("get", get, doc("get(unit)", "Read one component", "$now.get('year')")),
    (
        "toISO",
        to_iso,
        doc("toISO()", "ISO-8601 text with milliseconds", "$now.toISO()"),
    ),
    (
        "toISODate",
        to_iso_date,
        doc("toISODate()", "Calendar date as yyyy-MM-dd", "$now.toISODate()"),
    ),
    ("toUTC", to_utc, doc("toUTC()", "Same instant at offset zero", "$now.toUTC()")),
    (
        "toMillis",
        to_millis,
        doc("toMillis()", "Epoch milliseconds", "$now.toMillis()"),
    ),
    (
        "toSeconds",
        to_seconds,
        doc("toSeconds()", "Epoch seconds", "$now.toSeconds()"),
    ),
    (
        "isBefore",
        is_before,
        doc("isBefore(other)", "Whether this instant is earlier", "$now.isBefore('2030-01-01')"),
    ),
    (
        "isAfter",
        is_after,
        doc("isAfter(other)", "Whether this instant is later", "$now.isAfter('2020-01-01')"),
    ),
    (
        "equals",
        equals,
        doc("equals(other)", "Whether both are the same instant", "$now.equals($now)"),
    ),
    (
        "isWeekend",
        is_weekend,
        doc("isWeekend()", "Whether the day is Saturday or Sunday", "$today.isWeekend()"),
    ),
    ("toString", to_iso, doc("toString()", "ISO-8601 text", "$now.toString()")),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::Date(method), method_doc);
    }
}

fn run_length(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .take_while(|c| **c == chars[start])
        .count()
}

/// Render a date with a token pattern
///
/// Supported tokens: `y yy yyyy`, `M MM MMM MMMM` (also `L`), `d dd`,
/// `E EEE EEEE`, `H HH`, `h hh`, `m mm`, `s ss`, `SSS`, `a`, `ZZ ZZZ`,
/// `ooo` (day of year). Other ASCII letters are copied as-is.
pub fn format_date(dt: &DateTime<FixedOffset>, pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            let end = chars[i + 1..]
                .iter()
                .position(|q| *q == '\'')
                .map_or(chars.len(), |p| i + 1 + p);
            out.extend(&chars[i + 1..end]);
            i = end + 1;
            continue;
        }
        let run = run_length(&chars, i);
        let spec: Option<&str> = match (c, run) {
            ('y', 2) => Some("%y"),
            ('y', _) => Some("%Y"),
            ('M' | 'L', 1) => Some("%-m"),
            ('M' | 'L', 2) => Some("%m"),
            ('M' | 'L', 3) => Some("%b"),
            ('M' | 'L', _) => Some("%B"),
            ('d', 1) => Some("%-d"),
            ('d', _) => Some("%d"),
            ('E', 1) => Some("%u"),
            ('E', 3) => Some("%a"),
            ('E', _) => Some("%A"),
            ('H', 1) => Some("%-H"),
            ('H', _) => Some("%H"),
            ('h', 1) => Some("%-I"),
            ('h', _) => Some("%I"),
            ('m', 1) => Some("%-M"),
            ('m', _) => Some("%M"),
            ('s', 1) => Some("%-S"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('Z', 1 | 2) => Some("%:z"),
            ('Z', _) => Some("%z"),
            ('o', _) => Some("%j"),
            _ => None,
        };
        match spec {
            Some(spec) => {
                let _ = write!(out, "{}", dt.format(spec));
            }
            None => out.extend(&chars[i..i + run]),
        }
        i += run;
    }
    out
}

fn unit_arg(args: &[Value], index: usize, method: &str) -> Result<DateUnit> {
    let name = str_arg(args, index, method)?;
    DateUnit::parse(name).ok_or_else(|| {
        ExpressionError::invalid_argument(method, format!("unknown unit '{name}'"))
    })
}

fn out_of_range(method: &str) -> ExpressionError {
    ExpressionError::invalid_argument(method, "result is outside the supported date range")
}

/// Apply `amount unit` or a `{unit: amount}` object, negated when `sign` is -1
fn shift(
    dt: DateTime<FixedOffset>,
    args: &[Value],
    sign: f64,
    method: &str,
) -> Result<DateTime<FixedOffset>> {
    match arg(args, 0) {
        Value::Object(durations) => {
            let mut result = dt;
            for (unit_name, amount) in durations {
                let unit = DateUnit::parse(unit_name).ok_or_else(|| {
                    ExpressionError::invalid_argument(method, format!("unknown unit '{unit_name}'"))
                })?;
                result = datetime::add_duration(result, sign * amount.to_number(), unit)
                    .ok_or_else(|| out_of_range(method))?;
            }
            Ok(result)
        }
        _ => {
            let amount = num_arg(args, 0, method)?;
            let unit = match args.get(1) {
                Some(_) => unit_arg(args, 1, method)?,
                None => DateUnit::Millisecond,
            };
            datetime::add_duration(dt, sign * amount, unit).ok_or_else(|| out_of_range(method))
        }
    }
}

fn format(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    let pattern = str_arg(args, 0, "format")?;
    Ok(Value::String(format_date(&dt, pattern)))
}

fn plus(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    shift(dt, args, 1.0, "plus").map(Value::DateTime)
}

fn minus(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    shift(dt, args, -1.0, "minus").map(Value::DateTime)
}

fn diff(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    let other = value_to_date_time(arg(args, 0))?;
    let unit = match opt_str_arg(args, 1, "diff")? {
        Some(_) => unit_arg(args, 1, "diff")?,
        None => DateUnit::Millisecond,
    };
    Ok(Value::Number(datetime::diff(dt, other, unit)))
}

fn start_of(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    let unit = unit_arg(args, 0, "startOf")?;
    datetime::start_of(dt, unit)
        .map(Value::DateTime)
        .ok_or_else(|| out_of_range("startOf"))
}

fn end_of(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    let unit = unit_arg(args, 0, "endOf")?;
    datetime::end_of(dt, unit)
        .map(Value::DateTime)
        .ok_or_else(|| out_of_range("endOf"))
}

fn get(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    let unit = unit_arg(args, 0, "get")?;
    Ok(Value::Number(datetime::component(dt, unit)))
}

fn to_iso(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::String(format_date_time(&dt)))
}

fn to_iso_date(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::String(dt.format("%Y-%m-%d").to_string()))
}

fn to_utc(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::DateTime(dt.with_timezone(&Utc).fixed_offset()))
}

fn to_millis(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(dt.timestamp_millis() as f64))
}

fn to_seconds(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(dt.timestamp_millis() as f64 / 1000.0))
}

fn is_before(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(dt < value_to_date_time(arg(args, 0))?))
}

fn is_after(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(dt > value_to_date_time(arg(args, 0))?))
}

fn equals(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(dt == value_to_date_time(arg(args, 0))?))
}

fn is_weekend(_: &mut dyn CallSite, dt: DateTime<FixedOffset>, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(dt.weekday(), Weekday::Sat | Weekday::Sun)))
}
