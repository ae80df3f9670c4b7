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

//! Error taxonomy for template parsing, evaluation and lineage resolution
//!
//! Evaluation and validation never propagate these past the public entry points;
//! they are captured into result objects. Only construction-time misuse
//! ([`ConfigError`], [`ContextError`]) is returned directly to the host.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Result type for expression operations
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Severity of a surfaced error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Non-fatal, the host may continue
    Warning,
    /// Fatal for the current evaluation
    Error,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::Warning => write!(f, "warning"),
            ErrorLevel::Error => write!(f, "error"),
        }
    }
}

/// Which syntactic construct a parse error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// `{{` without a matching `}}`
    UnmatchedOpen,
    /// `}}` without a preceding `{{`
    UnmatchedClose,
    /// Token that does not fit the grammar
    UnexpectedToken,
    /// Input ended in the middle of an expression
    UnexpectedEnd,
    /// Malformed literal (string, number)
    InvalidLiteral,
    /// Construct outside the supported grammar
    Unsupported,
    /// Nesting or chain length above the parser's depth ceiling
    TooDeep,
}

/// Template or expression parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    /// Kind of failure
    pub kind: ParseErrorKind,
    /// Byte offset of the offending delimiter or token
    pub offset: usize,
    /// Human-readable message
    pub message: String,
}

impl ParseError {
    /// Create a new parse error
    pub fn new(kind: ParseErrorKind, offset: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            offset,
            message: message.into(),
        }
    }

    /// Shift the offset, used when an expression is parsed out of a larger template
    pub fn shifted(mut self, by: usize) -> Self {
        self.offset += by;
        self
    }
}

/// Which resource ceiling an evaluation hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Approximate allocation ceiling
    Memory,
    /// Evaluation nesting ceiling
    CallStack,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::CallStack => write!(f, "call stack"),
        }
    }
}

/// Paired-item lineage failures
///
/// Each variant is a distinct state: hosts treat "pending" data differently from
/// invalid lineage, so these must never be collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairedItemError {
    /// The run has produced no execution data at all
    #[error("No execution data available")]
    NoExecutionData,

    /// The referenced node has not produced data in this run
    #[error("No execution data found for node '{node}'")]
    NoNodeExecutionData {
        /// Referenced node
        node: String,
    },

    /// A node on the chain has no input connection
    #[error("Node '{node}' has no input connection")]
    NoInputConnection {
        /// Node without parents
        node: String,
    },

    /// The target is not reachable from the current node through connections
    #[error("No path back to node '{target}' from '{node}'")]
    NoConnection {
        /// Node the walk started from
        node: String,
        /// Node the expression referenced
        target: String,
    },

    /// Lineage info points at an item or input that does not exist
    #[error("Paired item data for node '{node}' is invalid: {reason}")]
    InvalidInfo {
        /// Node whose lineage record is broken
        node: String,
        /// What was wrong
        reason: String,
    },

    /// An item carries no lineage info
    #[error("Paired item data for item {item} of node '{node}' is missing")]
    NoInfo {
        /// Node whose item has no lineage
        node: String,
        /// Item index without lineage
        item: usize,
    },

    /// The chain passes through nodes whose data is unavailable
    #[error("Paired item chain passes through nodes without data: {}", .nodes.join(", "))]
    IntermediateNodes {
        /// Unavailable intermediate nodes
        nodes: Vec<String>,
    },
}

impl PairedItemError {
    /// Stable tag for host branching
    pub fn kind(&self) -> &'static str {
        match self {
            PairedItemError::NoExecutionData => "no_execution_data",
            PairedItemError::NoNodeExecutionData { .. } => "no_node_execution_data",
            PairedItemError::NoInputConnection { .. } => "no_input_connection",
            PairedItemError::NoConnection { .. } => "paired_item_no_connection",
            PairedItemError::InvalidInfo { .. } => "paired_item_invalid_info",
            PairedItemError::NoInfo { .. } => "paired_item_no_info",
            PairedItemError::IntermediateNodes { .. } => "paired_item_intermediate_nodes",
        }
    }

    /// Nodes named by the error
    pub fn nodes(&self) -> Vec<&str> {
        match self {
            PairedItemError::NoExecutionData => Vec::new(),
            PairedItemError::NoNodeExecutionData { node }
            | PairedItemError::NoInputConnection { node }
            | PairedItemError::InvalidInfo { node, .. }
            | PairedItemError::NoInfo { node, .. } => vec![node.as_str()],
            PairedItemError::NoConnection { node, target } => vec![node.as_str(), target.as_str()],
            PairedItemError::IntermediateNodes { nodes } => {
                nodes.iter().map(String::as_str).collect()
            }
        }
    }

    /// Whether the referenced data may still arrive later in the run
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            PairedItemError::NoExecutionData
                | PairedItemError::NoNodeExecutionData { .. }
                | PairedItemError::IntermediateNodes { .. }
        )
    }
}

/// Errors produced while evaluating a template
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Unbalanced delimiters or invalid expression syntax
    #[error("Parse error: {0}")]
    Parse(#[source] ParseError),

    /// Expression text matched a blocked rule
    #[error("Security violation: expression matches blocked pattern '{rule}'")]
    SecurityViolation {
        /// Name of the matched rule
        rule: String,
    },

    /// Free identifier outside the allowed globals
    #[error("{name} is not defined")]
    NotDefined {
        /// Identifier name
        name: String,
    },

    /// Wall-clock deadline exceeded
    #[error("Expression evaluation timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured deadline
        timeout_ms: u64,
    },

    /// Memory or call-stack ceiling exceeded
    #[error("Resource limit exceeded: {kind} (limit {limit})")]
    ResourceLimit {
        /// Which ceiling
        kind: ResourceKind,
        /// Configured limit
        limit: u64,
    },

    /// No method of that name for the receiver's type
    #[error("Method '{method}' does not exist on type {value_type}")]
    UnknownMethod {
        /// Method name
        method: String,
        /// Receiver type tag
        value_type: String,
    },

    /// Method invoked on null or undefined
    #[error("Cannot call '{method}' on a null or undefined value")]
    NullReceiver {
        /// Method name
        method: String,
        /// Suggested rewrite using optional access
        suggestion: String,
    },

    /// Property read on null or undefined
    #[error("Cannot read properties of {receiver} (reading '{property}')")]
    NullPropertyAccess {
        /// Property name
        property: String,
        /// `null` or `undefined`
        receiver: String,
    },

    /// No date format matched
    #[error("Invalid date: '{input}'")]
    InvalidDate {
        /// Offending input
        input: String,
    },

    /// Argument or operand of the wrong type or shape
    #[error("Invalid argument for '{name}': {message}")]
    InvalidArgument {
        /// Method or function name
        name: String,
        /// What was wrong
        message: String,
    },

    /// Value used as a function when it is not one
    #[error("{name} is not a function")]
    NotCallable {
        /// Callee description
        name: String,
    },

    /// Write to a read-only binding
    #[error("Cannot assign to variables at runtime ('{name}')")]
    ReadOnlyVariable {
        /// Target name
        name: String,
    },

    /// Construct outside the sandboxed surface
    #[error("Unsupported: {message}")]
    Unsupported {
        /// What was attempted
        message: String,
    },

    /// JSON-path query failure
    #[error("Query error: {message}")]
    Query {
        /// Query library message
        message: String,
    },

    /// Paired-item lineage failure
    #[error(transparent)]
    PairedItem(#[from] PairedItemError),

    /// Host-initiated cancellation
    #[error("Execution was cancelled")]
    Cancelled,

    /// Failure outside the evaluator (e.g. a worker task panicked)
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
    },
}

impl From<ParseError> for ExpressionError {
    /// Over-deep expressions surface as a call-stack limit rather than a syntax error
    fn from(err: ParseError) -> Self {
        match err.kind {
            ParseErrorKind::TooDeep => ExpressionError::ResourceLimit {
                kind: ResourceKind::CallStack,
                limit: crate::parser::MAX_EXPRESSION_DEPTH as u64,
            },
            _ => ExpressionError::Parse(err),
        }
    }
}

impl ExpressionError {
    /// Stable snake_case tag used as the result's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            ExpressionError::Parse(_) => "parse_error",
            ExpressionError::SecurityViolation { .. } => "security_error",
            ExpressionError::NotDefined { .. } => "not_defined_error",
            ExpressionError::Timeout { .. } => "timeout_error",
            ExpressionError::ResourceLimit { .. } => "resource_limit_error",
            ExpressionError::UnknownMethod { .. } => "unknown_method_error",
            ExpressionError::NullReceiver { .. } => "null_receiver_error",
            ExpressionError::NullPropertyAccess { .. } => "null_property_error",
            ExpressionError::InvalidDate { .. } => "invalid_date_error",
            ExpressionError::InvalidArgument { .. } => "invalid_argument_error",
            ExpressionError::NotCallable { .. } => "not_callable_error",
            ExpressionError::ReadOnlyVariable { .. } => "read_only_error",
            ExpressionError::Unsupported { .. } => "unsupported_error",
            ExpressionError::Query { .. } => "query_error",
            ExpressionError::PairedItem(inner) => inner.kind(),
            ExpressionError::Cancelled => "execution_cancelled",
            ExpressionError::Internal { .. } => "internal_error",
        }
    }

    /// Severity when surfaced to the host
    pub fn level(&self) -> ErrorLevel {
        match self {
            ExpressionError::Cancelled => ErrorLevel::Warning,
            _ => ErrorLevel::Error,
        }
    }

    /// Optional longer explanation, mostly fix hints
    pub fn description(&self) -> Option<String> {
        match self {
            ExpressionError::NullReceiver { suggestion, .. } => {
                Some(format!("Use optional access instead: {suggestion}"))
            }
            ExpressionError::NullPropertyAccess { property, .. } => Some(format!(
                "Use optional chaining to skip missing values, e.g. '?.{property}'"
            )),
            ExpressionError::NotDefined { .. } => {
                Some("Only the documented globals and $-variables are available".to_string())
            }
            ExpressionError::PairedItem(inner) if inner.is_pending() => Some(
                "The referenced node may not have run yet; execute the previous nodes first"
                    .to_string(),
            ),
            ExpressionError::PairedItem(_) => Some(
                "The item lineage could not be followed back to the referenced node".to_string(),
            ),
            _ => None,
        }
    }

    /// Node named by the error, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            ExpressionError::PairedItem(inner) => inner.nodes().first().copied(),
            _ => None,
        }
    }

    /// Build the null-receiver error with its optional-access hint
    pub fn null_receiver(method: impl Into<String>) -> Self {
        let method = method.into();
        let suggestion = format!("value?.{method}()");
        ExpressionError::NullReceiver { method, suggestion }
    }

    /// Shorthand for [`ExpressionError::InvalidArgument`]
    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        ExpressionError::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap into a node-scoped operational error for the host
    pub fn into_node_error(
        self,
        node: impl Into<String>,
        run_index: usize,
        item_index: usize,
    ) -> NodeOperationError {
        let description = self.description();
        let mut error = NodeOperationError::new(node, self.to_string(), run_index, item_index);
        error.description = description;
        error
    }
}

/// Invalid engine configuration, raised at construction time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A numeric limit must be positive
    #[error("Configuration value '{field}' must be greater than zero")]
    ZeroLimit {
        /// Field name
        field: &'static str,
    },

    /// A blocked-pattern rule did not compile
    #[error("Blocked pattern '{name}' is not a valid regular expression: {message}")]
    InvalidPattern {
        /// Rule name
        name: String,
        /// Regex compiler message
        message: String,
    },

    /// Runtime code construction cannot be enabled
    #[error("allowFunctionConstructor cannot be enabled: runtime code construction is always blocked")]
    FunctionConstructorNotAllowed,
}

/// Misuse of the per-run context store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Node scope requested without a node reference
    #[error("The request data of context type 'node' the node parameter has to be set")]
    MissingNode,

    /// Unknown scope name
    #[error("Unknown context scope '{0}'")]
    UnknownScope(String),
}

/// Node-scoped operational failure reported as a warning
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkflowOperationError {
    /// Message
    pub message: String,
    /// Node the failure belongs to
    pub node: Option<String>,
    /// Optional explanation
    pub description: Option<String>,
    /// Time the failure was recorded
    pub timestamp: DateTime<Utc>,
}

impl WorkflowOperationError {
    /// Create an error stamped with the current time
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node: None,
            description: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the node
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Always a warning
    pub fn level(&self) -> ErrorLevel {
        ErrorLevel::Warning
    }
}

/// Node-scoped failure carrying run/item coordinates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NodeOperationError {
    /// Node the failure belongs to
    pub node: String,
    /// Message after message-mapping overrides
    pub message: String,
    /// Optional explanation
    pub description: Option<String>,
    /// Run index of the failing execution
    pub run_index: usize,
    /// Item index of the failing item
    pub item_index: usize,
    /// Severity
    pub level: ErrorLevel,
}

impl NodeOperationError {
    /// Create a new error
    pub fn new(
        node: impl Into<String>,
        message: impl Into<String>,
        run_index: usize,
        item_index: usize,
    ) -> Self {
        Self {
            node: node.into(),
            message: message.into(),
            description: None,
            run_index,
            item_index,
            level: ErrorLevel::Error,
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the message when it contains one of the mapping keys
    ///
    /// The first key found in the current message wins; keys are checked in
    /// sorted order so the outcome does not depend on map iteration order.
    pub fn with_message_mapping(mut self, mapping: &HashMap<String, String>) -> Self {
        let mut keys: Vec<&String> = mapping.keys().collect();
        keys.sort();
        if let Some(key) = keys.into_iter().find(|key| self.message.contains(key.as_str())) {
            self.message = mapping[key].clone();
        }
        self
    }
}

/// Error object surfaced to the host UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Message
    pub message: String,
    /// Optional explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Severity
    pub level: ErrorLevel,
    /// Node the error belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// When the error was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&ExpressionError> for ErrorReport {
    fn from(error: &ExpressionError) -> Self {
        Self {
            message: error.to_string(),
            description: error.description(),
            level: error.level(),
            node: error.node().map(str::to_string),
            timestamp: None,
        }
    }
}

impl From<&WorkflowOperationError> for ErrorReport {
    fn from(error: &WorkflowOperationError) -> Self {
        Self {
            message: error.message.clone(),
            description: error.description.clone(),
            level: error.level(),
            node: error.node.clone(),
            timestamp: Some(error.timestamp),
        }
    }
}

impl From<&NodeOperationError> for ErrorReport {
    fn from(error: &NodeOperationError) -> Self {
        Self {
            message: error.message.clone(),
            description: error.description.clone(),
            level: error.level,
            node: Some(error.node.clone()),
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_a_warning() {
        assert_eq!(ExpressionError::Cancelled.level(), ErrorLevel::Warning);
        assert_eq!(ExpressionError::Cancelled.kind(), "execution_cancelled");
    }

    #[test]
    fn paired_item_kinds_are_distinct() {
        let errors = [
            PairedItemError::NoExecutionData,
            PairedItemError::NoNodeExecutionData { node: "A".into() },
            PairedItemError::NoInputConnection { node: "A".into() },
            PairedItemError::NoConnection {
                node: "A".into(),
                target: "B".into(),
            },
            PairedItemError::InvalidInfo {
                node: "A".into(),
                reason: "x".into(),
            },
            PairedItemError::NoInfo {
                node: "A".into(),
                item: 0,
            },
            PairedItemError::IntermediateNodes {
                nodes: vec!["A".into()],
            },
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn too_deep_parse_errors_become_call_stack_limits() {
        let error = ExpressionError::from(ParseError::new(ParseErrorKind::TooDeep, 4, "deep"));
        assert_eq!(error.kind(), "resource_limit_error");
        assert!(matches!(
            error,
            ExpressionError::ResourceLimit {
                kind: ResourceKind::CallStack,
                ..
            }
        ));

        let error = ExpressionError::from(ParseError::new(ParseErrorKind::UnexpectedEnd, 4, "end"));
        assert_eq!(error.kind(), "parse_error");
    }

    #[test]
    fn report_names_lineage_node() {
        let error = ExpressionError::from(PairedItemError::NoInfo {
            node: "HTTP Request".into(),
            item: 2,
        });
        let report = ErrorReport::from(&error);
        assert_eq!(report.node.as_deref(), Some("HTTP Request"));
        assert_eq!(report.level, ErrorLevel::Error);
        assert!(report.description.is_some());
    }

    #[test]
    fn message_mapping_overrides_message() {
        let mut mapping = HashMap::new();
        mapping.insert("timed out".to_string(), "The expression took too long".to_string());
        let error = ExpressionError::Timeout { timeout_ms: 10 }
            .into_node_error("Set", 0, 3)
            .with_message_mapping(&mapping);
        assert_eq!(error.message, "The expression took too long");
        assert_eq!(error.item_index, 3);
    }

    #[test]
    fn workflow_operation_error_is_warning_with_timestamp() {
        let error = WorkflowOperationError::new("rate limited").with_node("Slack");
        let report = ErrorReport::from(&error);
        assert_eq!(report.level, ErrorLevel::Warning);
        assert!(report.timestamp.is_some());
        assert_eq!(report.node.as_deref(), Some("Slack"));
    }
}
