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

//! Expression node definitions

use serde::Serialize;
use std::sync::Arc;

use super::operator::{BinaryOperator, UnaryOperator};
use crate::parser::span::Spanned;

/// Expression node with its byte span in the expression text
pub type Node = Spanned<Expression>;

/// Call arguments in source order
pub type Arguments = Vec<Node>;

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    /// Number literal (decimal, exponent or hex)
    Number(f64),
    /// Single, double or backtick quoted string
    String(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
}

/// AST node for template expressions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", content = "data", rename_all = "camelCase")]
pub enum Expression {
    /// Literal value
    Literal(Literal),

    /// Free identifier (`$json`, `Math`, a lambda parameter)
    Identifier(String),

    /// `[a, b, c]`
    Array(Vec<Node>),

    /// `{ key: value }`; keys are always static
    Object(Vec<(String, Node)>),

    /// `object.property` or `object?.property`
    Member {
        /// Receiver
        object: Box<Node>,
        /// Property name
        property: String,
        /// Written with `?.`
        optional: bool,
    },

    /// `object[index]` or `object?.[index]`
    Index {
        /// Receiver
        object: Box<Node>,
        /// Key expression
        index: Box<Node>,
        /// Written with `?.`
        optional: bool,
    },

    /// `callee(args)`; method calls have a `Member` callee
    Call {
        /// Function or member being called
        callee: Box<Node>,
        /// Arguments in order
        arguments: Arguments,
        /// Written with `?.(`
        optional: bool,
    },

    /// Prefix operator
    Unary {
        /// Operator
        operator: UnaryOperator,
        /// Operand
        operand: Box<Node>,
    },

    /// Infix operator
    Binary {
        /// Operator
        operator: BinaryOperator,
        /// Left operand
        left: Box<Node>,
        /// Right operand
        right: Box<Node>,
    },

    /// `test ? consequent : alternate`
    Conditional {
        /// Condition
        test: Box<Node>,
        /// Value when truthy
        consequent: Box<Node>,
        /// Value when falsy
        alternate: Box<Node>,
    },

    /// `(a, b) => body`
    Lambda {
        /// Parameter names
        params: Vec<String>,
        /// Body expression, shared with the closures built from it
        body: Arc<Node>,
    },

    /// `target = value`; parsed so it can be rejected with a precise error
    Assign {
        /// Assignment target
        target: Box<Node>,
        /// Assigned value
        value: Box<Node>,
    },
}

impl Expression {
    /// Number literal
    pub fn number(value: f64) -> Self {
        Expression::Literal(Literal::Number(value))
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal::String(value.into()))
    }

    /// Identifier
    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier(name.into())
    }

    /// Short label used in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            Expression::Literal(_) => "literal",
            Expression::Identifier(_) => "identifier",
            Expression::Array(_) => "array",
            Expression::Object(_) => "object",
            Expression::Member { .. } => "member access",
            Expression::Index { .. } => "index access",
            Expression::Call { .. } => "call",
            Expression::Unary { .. } => "unary operation",
            Expression::Binary { .. } => "binary operation",
            Expression::Conditional { .. } => "conditional",
            Expression::Lambda { .. } => "arrow function",
            Expression::Assign { .. } => "assignment",
        }
    }

    /// Name of the root identifier of a member chain (`$json` in `$json.a[0].b`)
    pub fn root_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(name) => Some(name),
            Expression::Member { object, .. } | Expression::Index { object, .. } => {
                object.value.root_identifier()
            }
            Expression::Call { callee, .. } => callee.value.root_identifier(),
            _ => None,
        }
    }
}
