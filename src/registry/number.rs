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

//! Number methods

use super::{
    CallSite, ExtensionRegistry, MethodDoc, MethodImpl, NumberMethod, doc, opt_num_arg,
    opt_str_arg,
};
use crate::error::{ExpressionError, Result};
use crate::model::datetime::{DateInput, normalize_date_time};
use crate::model::{Value, format_number};

const METHODS: &[(&str, NumberMethod, MethodDoc)] = &[
    (
        "toFixed",
        to_fixed,
        doc("toFixed(digits?)", "Format with a fixed number of decimals", "(1.005).toFixed(2)"),
    ),
    (
        "toString",
        to_string,
        doc("toString(radix?)", "Convert to text, optionally in another base", "(255).toString(16)"),
    ),
    (
        "round",
        round,
        doc("round(decimals?)", "Round half up to the given decimals", "(1.256).round(2)"),
    ),
    ("floor", floor, doc("floor()", "Round down", "(1.7).floor()")),
    ("ceil", ceil, doc("ceil()", "Round up", "(1.2).ceil()")),
    ("abs", abs, doc("abs()", "Absolute value", "(-3).abs()")),
    ("isEven", is_even, doc("isEven()", "Whether the integer is even", "(4).isEven()")),
    ("isOdd", is_odd, doc("isOdd()", "Whether the integer is odd", "(3).isOdd()")),
    (
        "isInteger",
        is_integer,
        doc("isInteger()", "Whether the number has no fraction", "(3).isInteger()"),
    ),
    ("toInt", to_int, doc("toInt()", "Drop the fraction", "(3.7).toInt()")),
    (
        "toBoolean",
        to_boolean,
        doc("toBoolean()", "False for 0 and NaN, true otherwise", "(1).toBoolean()"),
    ),
    (
        "format",
        format,
        doc("format()", "Group thousands with commas", "(1234567.891).format()"),
    ),
    (
        "toDateTime",
        to_date_time,
        doc(
            "toDateTime(unit?)",
            "Read as epoch milliseconds, or seconds with 's'",
            "(1700000000).toDateTime('s')",
        ),
    ),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::Number(method), method_doc);
    }
}

/// `Math.round`: halves round toward positive infinity
pub(crate) fn js_round(n: f64) -> f64 {
    if n.is_finite() { (n + 0.5).floor() } else { n }
}

fn to_fixed(_: &mut dyn CallSite, n: f64, args: &[Value]) -> Result<Value> {
    let digits = opt_num_arg(args, 0).unwrap_or(0.0);
    if !(0.0..=100.0).contains(&digits) {
        return Err(ExpressionError::invalid_argument(
            "toFixed",
            "digits must be between 0 and 100",
        ));
    }
    if !n.is_finite() {
        return Ok(Value::String(format_number(n)));
    }
    Ok(Value::String(format!("{:.*}", digits as usize, n)))
}

fn to_string(_: &mut dyn CallSite, n: f64, args: &[Value]) -> Result<Value> {
    let radix = opt_num_arg(args, 0).unwrap_or(10.0);
    if radix == 10.0 {
        return Ok(Value::String(format_number(n)));
    }
    if !(2.0..=36.0).contains(&radix) || radix.fract() != 0.0 {
        return Err(ExpressionError::invalid_argument(
            "toString",
            "radix must be an integer between 2 and 36",
        ));
    }
    if !n.is_finite() || n.fract() != 0.0 {
        return Ok(Value::String(format_number(n)));
    }
    Ok(Value::String(integer_in_radix(n as i64, radix as u32)))
}

fn integer_in_radix(value: i64, radix: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    let mut rest = value.unsigned_abs();
    while rest > 0 {
        let digit = (rest % u64::from(radix)) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('?'));
        rest /= u64::from(radix);
    }
    if value < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn round(_: &mut dyn CallSite, n: f64, args: &[Value]) -> Result<Value> {
    let decimals = opt_num_arg(args, 0).unwrap_or(0.0).trunc();
    let factor = 10f64.powi(decimals.clamp(-20.0, 20.0) as i32);
    Ok(Value::Number(js_round(n * factor) / factor))
}

fn floor(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(n.floor()))
}

fn ceil(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(n.ceil()))
}

fn abs(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(n.abs()))
}

fn is_even(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(n.fract() == 0.0 && n % 2.0 == 0.0))
}

fn is_odd(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(n.fract() == 0.0 && n.abs() % 2.0 == 1.0))
}

fn is_integer(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(n.is_finite() && n.fract() == 0.0))
}

fn to_int(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(n.trunc()))
}

fn to_boolean(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(n != 0.0 && !n.is_nan()))
}

fn format(_: &mut dyn CallSite, n: f64, _: &[Value]) -> Result<Value> {
    if !n.is_finite() {
        return Ok(Value::String(format_number(n)));
    }
    let rounded = js_round(n.abs() * 1000.0) / 1000.0;
    let text = format_number(rounded);
    let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let mut grouped = String::new();
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if !fraction.is_empty() {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    if n < 0.0 && rounded != 0.0 {
        grouped.insert(0, '-');
    }
    Ok(Value::String(grouped))
}

fn to_date_time(_: &mut dyn CallSite, n: f64, args: &[Value]) -> Result<Value> {
    let millis = match opt_str_arg(args, 0, "toDateTime")? {
        None | Some("ms") => n,
        Some("s") => n * 1000.0,
        Some(other) => {
            return Err(ExpressionError::invalid_argument(
                "toDateTime",
                format!("unknown unit '{other}', expected 'ms' or 's'"),
            ));
        }
    };
    normalize_date_time(DateInput::Millis(millis)).map(Value::DateTime)
}

#[cfg(test)]
mod tests {
    use super::super::testing::call;
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(2.5, 3.0)]
    #[case(-2.5, -2.0)]
    #[case(1.4, 1.0)]
    fn rounding_matches_math_round(#[case] input: f64, #[case] expected: f64) {
        assert_eq!(js_round(input), expected);
    }

    #[test]
    fn fixed_and_radix() {
        assert_eq!(
            call(Value::from(1.23456), "toFixed", &[Value::from(2.0)]).unwrap(),
            Value::from("1.23")
        );
        assert_eq!(
            call(Value::from(255.0), "toString", &[Value::from(16.0)]).unwrap(),
            Value::from("ff")
        );
        assert_eq!(
            call(Value::from(-5.0), "toString", &[Value::from(2.0)]).unwrap(),
            Value::from("-101")
        );
    }

    #[test]
    fn round_to_decimals() {
        assert_eq!(
            call(Value::from(1.256), "round", &[Value::from(2.0)]).unwrap(),
            Value::from(1.26)
        );
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(
            call(Value::from(1_234_567.891), "format", &[]).unwrap(),
            Value::from("1,234,567.891")
        );
        assert_eq!(call(Value::from(-999.0), "format", &[]).unwrap(), Value::from("-999"));
    }

    #[test]
    fn parity() {
        assert_eq!(call(Value::from(4.0), "isEven", &[]).unwrap(), Value::Bool(true));
        assert_eq!(call(Value::from(-3.0), "isOdd", &[]).unwrap(), Value::Bool(true));
        assert_eq!(call(Value::from(2.5), "isEven", &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn epoch_seconds() {
        let value = call(Value::from(86_400.0), "toDateTime", &[Value::from("s")]).unwrap();
        assert!(matches!(value, Value::DateTime(dt) if dt.timestamp() == 86_400));
    }
}
