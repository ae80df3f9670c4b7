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

//! Core value types for template expressions
//!
//! Runtime values are a closed tagged variant; method dispatch goes through the
//! extension registry keyed by [`ValueKind`], never through reflection.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

use super::host::HostValue;
use crate::ast::Node;

/// Ordered object map used by [`Value::Object`]
pub type ObjectMap = IndexMap<String, Value>;

/// Runtime type tag of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Text
    String,
    /// IEEE-754 double
    Number,
    /// true / false
    Boolean,
    /// Ordered list
    Array,
    /// Key/value map
    Object,
    /// Date-time with offset
    Date,
    /// Explicit null
    Null,
    /// Missing value
    Undefined,
    /// Callable
    Function,
}

impl ValueKind {
    /// Tag as surfaced in results (`"string"`, `"number"`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Date => "date",
            ValueKind::Null => "null",
            ValueKind::Undefined => "undefined",
            ValueKind::Function => "function",
        }
    }

    /// Categories that carry extension methods
    pub const METHOD_KINDS: [ValueKind; 6] = [
        ValueKind::String,
        ValueKind::Number,
        ValueKind::Boolean,
        ValueKind::Array,
        ValueKind::Object,
        ValueKind::Date,
    ];
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arrow function closed over the locals visible where it was written
#[derive(Debug, Clone)]
pub struct Lambda {
    /// Parameter names
    pub params: Vec<String>,
    /// Body expression
    pub body: Arc<Node>,
    /// Captured locals (outer lambda parameters)
    pub captured: Vec<(String, Value)>,
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body) && self.params == other.params
    }
}

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Missing value
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Number (always f64)
    Number(f64),
    /// String
    String(String),
    /// Array
    Array(Vec<Value>),
    /// Object with insertion-ordered keys
    Object(ObjectMap),
    /// Date-time
    DateTime(DateTime<FixedOffset>),
    /// Arrow function
    Function(Arc<Lambda>),
    /// Host-provided proxy (namespaces, builtins, node references)
    Host(HostValue),
}

impl Value {
    /// Create a string value
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    /// Runtime type tag
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::DateTime(_) => ValueKind::Date,
            Value::Function(_) => ValueKind::Function,
            Value::Host(host) => host.kind(),
        }
    }

    /// Type tag as a string
    pub fn type_tag(&self) -> &'static str {
        self.kind().as_str()
    }

    /// True for null and undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// JavaScript truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as an array
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as an object
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// JavaScript `ToNumber`
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => parse_js_number(s),
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            Value::DateTime(dt) => dt.timestamp_millis() as f64,
            Value::Object(_) | Value::Function(_) | Value::Host(_) => f64::NAN,
        }
    }

    /// JavaScript `String(value)`
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::DateTime(dt) => format_date_time(dt),
            Value::Function(_) => "[Function]".to_string(),
            Value::Host(host) => host.to_string(),
        }
    }

    /// Rendering used when a value is spliced into template text
    ///
    /// Null and undefined render empty; arrays and objects render as JSON.
    pub fn to_template_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
            other => other.to_js_string(),
        }
    }

    /// Convert to JSON; dates become RFC 3339 strings, non-finite numbers and callables null
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Host(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => JsonValue::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::DateTime(dt) => JsonValue::String(format_date_time(dt)),
        }
    }

    /// Rough byte footprint used for the memory ceiling
    pub fn approx_size(&self) -> usize {
        const SLOT: usize = 16;
        match self {
            Value::String(s) => SLOT + s.len(),
            Value::Array(items) => SLOT + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Object(map) => {
                SLOT + map
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum::<usize>()
            }
            _ => SLOT,
        }
    }

    /// Structural deep equality with JavaScript loose-equality rules for scalars
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if let (Value::Bool(a), Value::Bool(b)) = (self, other) {
                    return a == b;
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structural deep equality without coercion
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.strict_equals(w)))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::from(&value)
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<ObjectMap> for Value {
    fn from(value: ObjectMap) -> Self {
        Value::Object(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

/// Format a number the way JavaScript's `String(n)` does for common cases
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// ISO rendering with millisecond precision, `Z` for UTC
pub fn format_date_time(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JavaScript `Number(string)`
pub fn parse_js_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn numbers_format_like_javascript() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let source = json!({"a": [1, "two", null], "b": {"c": true}});
        let value = Value::from(&source);
        assert_eq!(value.kind(), ValueKind::Object);
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Object(ObjectMap::new()).is_truthy());
    }

    #[test]
    fn to_number_coerces_strings() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("0x10").to_number(), 16.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert_eq!(Value::Null.to_number(), 0.0);
    }

    #[test]
    fn loose_equality_coerces_scalars() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::Number(1.0)));
        assert!(!Value::from("1").strict_equals(&Value::Number(1.0)));
        assert!(Value::from(vec![Value::from(1.0)]).strict_equals(&Value::from(vec![Value::from(1.0)])));
    }

    #[test]
    fn template_string_renders_nullish_empty() {
        assert_eq!(Value::Undefined.to_template_string(), "");
        assert_eq!(
            Value::from(&json!({"a": 1})).to_template_string(),
            r#"{"a":1}"#
        );
    }
}
