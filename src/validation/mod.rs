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

//! Static template validation
//!
//! Validation never evaluates anything. Templates are parsed and analyzed,
//! then run through an ordered pipeline of layers:
//! syntax, semantic, security, performance, business. Each layer can be
//! switched off on its own. Issues are merged in layer order; once the
//! number of errors reaches `max_errors` the remaining layers are skipped.

mod layers;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::context::ExpressionContext;
use crate::diagnostics::SourceLocation;
use crate::error::{ErrorLevel, ParseError};
use crate::parser::{ParsedExpression, Segment, Template, compile_expression, parse_template};
use crate::registry::ExtensionRegistry;
use crate::security::SecurityPolicy;

use layers::{
    BusinessLayer, LayerInput, PerformanceLayer, SecurityLayer, SemanticLayer, SyntaxLayer,
    ValidationRule,
};

/// Pipeline stage that produced an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLayer {
    /// Delimiters and expression grammar
    Syntax,
    /// Names, methods and node references
    Semantic,
    /// Blocked patterns and assignments
    Security,
    /// Length, depth and complexity thresholds
    Performance,
    /// Authoring conventions
    Business,
}

impl fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationLayer::Syntax => "syntax",
            ValidationLayer::Semantic => "semantic",
            ValidationLayer::Security => "security",
            ValidationLayer::Performance => "performance",
            ValidationLayer::Business => "business",
        };
        f.write_str(name)
    }
}

/// Per-layer switches, all enabled by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerToggles {
    /// Syntax layer
    pub syntax: bool,
    /// Semantic layer
    pub semantic: bool,
    /// Security layer
    pub security: bool,
    /// Performance layer
    pub performance: bool,
    /// Business layer
    pub business: bool,
}

impl Default for LayerToggles {
    fn default() -> Self {
        Self {
            syntax: true,
            semantic: true,
            security: true,
            performance: true,
            business: true,
        }
    }
}

impl LayerToggles {
    /// Whether `layer` runs
    pub fn is_enabled(&self, layer: ValidationLayer) -> bool {
        match layer {
            ValidationLayer::Syntax => self.syntax,
            ValidationLayer::Semantic => self.semantic,
            ValidationLayer::Security => self.security,
            ValidationLayer::Performance => self.performance,
            ValidationLayer::Business => self.business,
        }
    }
}

/// Validation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Enabled layers
    pub layers: LayerToggles,
    /// Stop collecting once this many errors were found
    pub max_errors: usize,
    /// Longest expression text accepted, in bytes
    pub max_expression_length: usize,
    /// Deepest expression tree accepted
    pub max_nesting_depth: usize,
    /// Highest weighted node count accepted
    pub max_complexity: u32,
    /// Expressions per template before a warning
    pub max_expressions: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            layers: LayerToggles::default(),
            max_errors: 100,
            max_expression_length: 5_000,
            max_nesting_depth: 20,
            max_complexity: 200,
            max_expressions: 50,
        }
    }
}

impl ValidationConfig {
    /// Turn one layer on or off
    pub fn with_layer(mut self, layer: ValidationLayer, enabled: bool) -> Self {
        let toggle = match layer {
            ValidationLayer::Syntax => &mut self.layers.syntax,
            ValidationLayer::Semantic => &mut self.layers.semantic,
            ValidationLayer::Security => &mut self.layers.security,
            ValidationLayer::Performance => &mut self.layers.performance,
            ValidationLayer::Business => &mut self.layers.business,
        };
        *toggle = enabled;
        self
    }
}

/// One finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Layer that reported it
    pub layer: ValidationLayer,
    /// `error` makes the template invalid; `warning` does not
    pub level: ErrorLevel,
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
    /// Range in the template, when the issue has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Suggested fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub(crate) fn error(layer: ValidationLayer, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            layer,
            level: ErrorLevel::Error,
            code,
            message: message.into(),
            location: None,
            suggestion: None,
        }
    }

    pub(crate) fn warning(
        layer: ValidationLayer,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level: ErrorLevel::Warning,
            ..Self::error(layer, code, message)
        }
    }

    pub(crate) fn at(mut self, template: &str, start: usize, end: usize) -> Self {
        self.location = Some(SourceLocation::from_offsets(template, start, end));
        self
    }

    pub(crate) fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Outcome of `validate`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True iff `errors` is empty
    pub is_valid: bool,
    /// Findings that make the template invalid
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.level == ErrorLevel::Error);
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Every issue, errors first
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(&self.warnings)
    }
}

/// Input of one validation run
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    template: &'a str,
    parsed: Option<Template>,
    context: Option<&'a ExpressionContext>,
    config: ValidationConfig,
}

impl<'a> ValidationContext<'a> {
    /// Validate `template` with default limits
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            parsed: None,
            context: None,
            config: ValidationConfig::default(),
        }
    }

    /// Reuse an already segmented template
    pub fn with_parsed(mut self, parsed: Template) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// Check node references against a (partial) execution context
    pub fn with_context(mut self, context: &'a ExpressionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Replace the limits
    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Template text
    pub fn template(&self) -> &str {
        self.template
    }

    /// Active limits
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

/// One resolvable segment with its compilation outcome
#[derive(Debug, Clone)]
pub(crate) struct CompiledSegment {
    pub from: usize,
    pub to: usize,
    pub expression: String,
    pub offset: usize,
    /// `None` when the expression is over the length limit and was not parsed
    pub compiled: Option<Result<ParsedExpression, ParseError>>,
}

/// Layered static validator
pub struct ValidationEngine {
    policy: SecurityPolicy,
    registry: Arc<ExtensionRegistry>,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidationEngine {
    /// Create a validator enforcing `policy`
    pub fn new(policy: SecurityPolicy, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            policy,
            registry,
            rules: vec![
                Box::new(SyntaxLayer),
                Box::new(SemanticLayer),
                Box::new(SecurityLayer),
                Box::new(PerformanceLayer),
                Box::new(BusinessLayer),
            ],
        }
    }

    /// Run every enabled layer
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let config = &ctx.config;
        let parsed = match &ctx.parsed {
            Some(parsed) => parsed.clone(),
            None => match parse_template(ctx.template) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let mut issues = Vec::new();
                    if config.layers.syntax {
                        let end = (err.offset + 2).min(ctx.template.len()).max(err.offset);
                        issues.push(
                            ValidationIssue::error(ValidationLayer::Syntax, "unbalanced_delimiter", err.message)
                                .at(ctx.template, err.offset, end),
                        );
                    }
                    return ValidationResult::from_issues(issues);
                }
            },
        };

        // Over-long expressions are only reported by the performance layer
        let skip_long = config.layers.performance;
        let segments: Vec<CompiledSegment> = parsed
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Resolvable {
                    from,
                    to,
                    expression,
                    expression_offset,
                } => Some(CompiledSegment {
                    from: *from,
                    to: *to,
                    expression: expression.clone(),
                    offset: *expression_offset,
                    compiled: (!skip_long || expression.len() <= config.max_expression_length)
                        .then(|| compile_expression(expression, *expression_offset)),
                }),
                Segment::Literal { .. } => None,
            })
            .collect();

        let input = LayerInput {
            template: ctx.template,
            segments: &segments,
            context: ctx.context,
            config,
            policy: &self.policy,
            registry: &self.registry,
        };

        let mut issues = Vec::new();
        let mut error_count = 0;
        for rule in &self.rules {
            if !config.layers.is_enabled(rule.layer()) {
                continue;
            }
            for issue in rule.check(&input) {
                if issue.level == ErrorLevel::Error {
                    if error_count >= config.max_errors {
                        continue;
                    }
                    error_count += 1;
                }
                issues.push(issue);
            }
            if error_count >= config.max_errors {
                log::debug!("validation stopped after {} errors", error_count);
                break;
            }
        }
        ValidationResult::from_issues(issues)
    }
}

impl fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("rules", &self.rules.iter().map(|r| r.layer()).collect::<Vec<_>>())
            .finish()
    }
}
