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

//! JSON-path queries against the current item
//!
//! Segments such as `{{ $.items[0].name }}` bypass the interpreter and run
//! through a [`JsonQuery`] implementation. Hosts may plug in a full query
//! library; [`SimpleJsonPath`] covers dotted keys, bracketed keys, indices
//! (negative counts from the end) and wildcards.

use crate::error::{ExpressionError, Result};
use crate::model::Value;

/// Query seam used for JSON-path segments
pub trait JsonQuery: Send + Sync {
    /// Run `path` against `data`
    ///
    /// A path without wildcards yields the single match (undefined when
    /// nothing matches); a path with wildcards yields an array of matches.
    fn query(&self, data: &Value, path: &str) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(i64),
    Wildcard,
}

/// Built-in subset of JSON-path
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleJsonPath;

impl SimpleJsonPath {
    fn parse(path: &str) -> Result<Vec<Step>> {
        let path = path.trim();
        let rest = path
            .strip_prefix('$')
            .ok_or_else(|| query_error(format!("path '{path}' must start with '$'")))?;
        let chars: Vec<char> = rest.chars().collect();
        let mut steps = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if chars.get(i + 1) == Some(&'.') {
                        return Err(query_error("recursive descent '..' is not supported"));
                    }
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                        end += 1;
                    }
                    let key: String = chars[start..end].iter().collect();
                    match key.as_str() {
                        "" => return Err(query_error("empty key after '.'")),
                        "*" => steps.push(Step::Wildcard),
                        _ => steps.push(Step::Key(key)),
                    }
                    i = end;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| query_error("unclosed '['"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    steps.push(Self::bracket(inner.trim())?);
                    i = close + 1;
                }
                other => {
                    return Err(query_error(format!("unexpected character '{other}'")));
                }
            }
        }
        Ok(steps)
    }

    fn bracket(inner: &str) -> Result<Step> {
        if inner == "*" {
            return Ok(Step::Wildcard);
        }
        for quote in ['\'', '"'] {
            if let Some(key) = inner
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
            {
                return Ok(Step::Key(key.to_string()));
            }
        }
        inner
            .parse::<i64>()
            .map(Step::Index)
            .map_err(|_| query_error(format!("unsupported selector '[{inner}]'")))
    }

    fn select(current: Vec<Value>, step: &Step) -> Vec<Value> {
        let mut next = Vec::new();
        for value in current {
            match (step, value) {
                (Step::Key(key), Value::Object(mut map)) => {
                    if let Some(found) = map.shift_remove(key) {
                        next.push(found);
                    }
                }
                (Step::Key(key), Value::Array(items)) => {
                    if let Some(found) = key.parse::<usize>().ok().and_then(|i| items.get(i)) {
                        next.push(found.clone());
                    }
                }
                (Step::Index(index), Value::Array(mut items)) => {
                    let len = items.len() as i64;
                    let position = if *index < 0 { len + index } else { *index };
                    if (0..len).contains(&position) {
                        next.push(items.swap_remove(position as usize));
                    }
                }
                (Step::Wildcard, Value::Array(items)) => next.extend(items),
                (Step::Wildcard, Value::Object(map)) => next.extend(map.into_values()),
                _ => {}
            }
        }
        next
    }
}

impl JsonQuery for SimpleJsonPath {
    fn query(&self, data: &Value, path: &str) -> Result<Value> {
        let steps = Self::parse(path)?;
        let wildcard = steps.contains(&Step::Wildcard);
        let matches = steps
            .iter()
            .fold(vec![data.clone()], |current, step| Self::select(current, step));

        if wildcard {
            Ok(Value::Array(matches))
        } else {
            Ok(matches.into_iter().next().unwrap_or_default())
        }
    }
}

fn query_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Query {
        message: message.into(),
    }
}
