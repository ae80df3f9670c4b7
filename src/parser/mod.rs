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

//! Template and expression parsing
//!
//! Templates are first segmented ([`parse_template`]); each resolvable segment
//! is then compiled into a [`ParsedExpression`], which is either routed to the
//! JSON-path query seam or parsed into an AST for the interpreter.

#![warn(missing_docs)]

pub mod pratt;
pub mod span;
pub mod template;
pub mod tokenizer;

use serde::Serialize;
use std::sync::Arc;

use crate::ast::{Dependency, ExpressionAnalysis, Node, analyze};

pub use pratt::{MAX_EXPRESSION_DEPTH, parse_expression_pratt};
pub use span::Spanned;
pub use template::{ExpressionRoute, Segment, Template, parse_template};
pub use tokenizer::{ParseResult, Token, Tokenizer};

// Short name used across the crate
pub use pratt::parse_expression_pratt as parse_expression;

/// Compiled form of one resolvable segment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedExpression {
    /// Inner expression text
    pub source: String,
    /// Offset of `source` within the template
    pub offset: usize,
    /// Where the expression is evaluated
    pub route: ExpressionRoute,
    /// Expression tree; `None` for JSON-path queries
    pub ast: Option<Arc<Node>>,
    /// Static dependency hint and cost figures
    pub analysis: ExpressionAnalysis,
}

/// Compile an expression found at `offset` in a template
///
/// Parse errors are shifted so their offsets point into the template.
pub fn compile_expression(source: &str, offset: usize) -> ParseResult<ParsedExpression> {
    let route = ExpressionRoute::for_expression(source);
    let (ast, analysis) = match route {
        ExpressionRoute::JsonQuery => {
            let mut analysis = ExpressionAnalysis {
                dependencies_complete: true,
                complexity: 1,
                depth: 1,
                node_count: 1,
                ..Default::default()
            };
            analysis.dependencies.insert(Dependency {
                root: "$json".to_string(),
                key: None,
            });
            (None, analysis)
        }
        ExpressionRoute::Evaluator => {
            let node = parse_expression(source).map_err(|e| e.shifted(offset))?;
            let analysis = analyze(&node);
            (Some(Arc::new(node)), analysis)
        }
    };
    Ok(ParsedExpression {
        source: source.to_string(),
        offset,
        route,
        ast,
        analysis,
    })
}

/// Compile the expression of a resolvable segment; `None` for literal segments
pub fn compile_segment(segment: &Segment) -> Option<ParseResult<ParsedExpression>> {
    match segment {
        Segment::Resolvable {
            expression,
            expression_offset,
            ..
        } => Some(compile_expression(expression, *expression_offset)),
        Segment::Literal { .. } => None,
    }
}
