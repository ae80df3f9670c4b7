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

//! Evaluation results

use serde::{Serialize, Serializer};
use serde_json::json;

use crate::error::{ErrorLevel, ExpressionError};
use crate::model::Value;

/// `[start, end)` byte range into the evaluated template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorPosition {
    /// Start offset
    pub start: usize,
    /// End offset
    pub end: usize,
}

impl ErrorPosition {
    /// Create a range
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Figures collected while evaluating one template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetadata {
    /// Segments in the template
    pub segment_count: usize,
    /// Resolvable segments
    pub expression_count: usize,
    /// Segments served from the cache
    pub cache_hits: usize,
    /// Interpreter steps spent
    pub steps: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Value(Value),
    Error {
        error: ExpressionError,
        position: Option<ErrorPosition>,
    },
}

/// Outcome of `evaluate`: a value or an error, never both
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    outcome: Outcome,
    /// Wall-clock time spent, 0 when served from the cache
    pub execution_time_ms: f64,
    /// Whether every segment came from the cache
    pub cached: bool,
    /// Present when `output.includeMetadata` is set
    pub metadata: Option<EvaluationMetadata>,
}

impl EvaluationResult {
    /// Successful result
    pub fn success(value: Value, execution_time_ms: f64) -> Self {
        Self {
            outcome: Outcome::Value(value),
            execution_time_ms,
            cached: false,
            metadata: None,
        }
    }

    /// Failed result, optionally pointing into the template
    pub fn failure(
        error: ExpressionError,
        position: Option<ErrorPosition>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            outcome: Outcome::Error { error, position },
            execution_time_ms,
            cached: false,
            metadata: None,
        }
    }

    pub(crate) fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        if cached {
            self.execution_time_ms = 0.0;
        }
        self
    }

    pub(crate) fn with_metadata(mut self, metadata: Option<EvaluationMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether a value was produced
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Value(_))
    }

    /// The value, on success
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Value(value) => Some(value),
            Outcome::Error { .. } => None,
        }
    }

    /// The error, on failure
    pub fn error(&self) -> Option<&ExpressionError> {
        match &self.outcome {
            Outcome::Value(_) => None,
            Outcome::Error { error, .. } => Some(error),
        }
    }

    /// Error range in the template, when known
    pub fn error_position(&self) -> Option<ErrorPosition> {
        match &self.outcome {
            Outcome::Error { position, .. } => *position,
            Outcome::Value(_) => None,
        }
    }

    /// Value type tag on success, error kind on failure
    pub fn type_tag(&self) -> &'static str {
        match &self.outcome {
            Outcome::Value(value) => value.type_tag(),
            Outcome::Error { error, .. } => error.kind(),
        }
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<Value, ExpressionError> {
        match self.outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Error { error, .. } => Err(error),
        }
    }
}

impl Serialize for EvaluationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = json!({
            "success": self.is_success(),
            "type": self.type_tag(),
            "executionTime": self.execution_time_ms,
            "cached": self.cached,
        });
        match &self.outcome {
            Outcome::Value(value) => {
                body["value"] = value.to_json();
            }
            Outcome::Error { error, position } => {
                let level = match error.level() {
                    ErrorLevel::Warning => "warning",
                    ErrorLevel::Error => "error",
                };
                body["error"] = json!({
                    "type": error.kind(),
                    "message": error.to_string(),
                    "description": error.description(),
                    "level": level,
                    "node": error.node(),
                    "position": position,
                });
            }
        }
        if let Some(metadata) = &self.metadata {
            body["metadata"] = json!(metadata);
        }
        body.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn success_carries_value_only() {
        let result = EvaluationResult::success(Value::Number(2.0), 0.3);
        assert!(result.is_success());
        assert_eq!(result.value(), Some(&Value::Number(2.0)));
        assert!(result.error().is_none());
        assert_eq!(result.type_tag(), "number");
    }

    #[test]
    fn failure_carries_error_only() {
        let error = ExpressionError::NotDefined {
            name: "foo".into(),
        };
        let result = EvaluationResult::failure(error, Some(ErrorPosition::new(3, 6)), 0.1);
        assert!(!result.is_success());
        assert!(result.value().is_none());
        assert_eq!(result.type_tag(), "not_defined_error");
        assert_eq!(result.error_position(), Some(ErrorPosition::new(3, 6)));
    }

    #[test]
    fn cached_results_report_zero_time() {
        let result = EvaluationResult::success(Value::Null, 4.2).with_cached(true);
        assert_eq!(result.execution_time_ms, 0.0);
        assert!(result.cached);
    }

    #[test]
    fn serializes_for_hosts() {
        let result = EvaluationResult::success(Value::from("x"), 1.5);
        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body["value"], "x");
        assert_eq!(body["type"], "string");
        assert!(body.get("error").is_none());

        let failed = EvaluationResult::failure(ExpressionError::Cancelled, None, 0.0);
        let body = serde_json::to_value(&failed).unwrap();
        assert_eq!(body["error"]["level"], "warning");
        assert_eq!(body["type"], "execution_cancelled");
        assert!(body.get("value").is_none());
    }
}
