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

//! The five validation layers

use super::{CompiledSegment, ValidationConfig, ValidationIssue, ValidationLayer};
use crate::context::ExpressionContext;
use crate::model::is_host_method;
use crate::parser::ParsedExpression;
use crate::registry::ExtensionRegistry;
use crate::security::SecurityPolicy;

/// Share of a limit past which a warning is raised
const WARNING_RATIO: f64 = 0.75;

/// Everything a layer may look at
pub(crate) struct LayerInput<'a> {
    pub template: &'a str,
    pub segments: &'a [CompiledSegment],
    pub context: Option<&'a ExpressionContext>,
    pub config: &'a ValidationConfig,
    pub policy: &'a SecurityPolicy,
    pub registry: &'a ExtensionRegistry,
}

impl LayerInput<'_> {
    /// Segments that compiled, with their analysis
    fn compiled(&self) -> impl Iterator<Item = (&CompiledSegment, &ParsedExpression)> {
        self.segments
            .iter()
            .filter_map(|segment| match &segment.compiled {
                Some(Ok(compiled)) => Some((segment, compiled)),
                _ => None,
            })
    }
}

/// One stage of the pipeline
pub(crate) trait ValidationRule: Send + Sync {
    /// Stage this rule implements
    fn layer(&self) -> ValidationLayer;

    /// Issues found in the template
    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue>;
}

pub(crate) struct SyntaxLayer;

impl ValidationRule for SyntaxLayer {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Syntax
    }

    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue> {
        input
            .segments
            .iter()
            .filter_map(|segment| match &segment.compiled {
                Some(Err(err)) => Some(err),
                _ => None,
            })
            .map(|err| {
                let end = (err.offset + 1).min(input.template.len()).max(err.offset);
                ValidationIssue::error(ValidationLayer::Syntax, "syntax_error", err.message.clone())
                    .at(input.template, err.offset, end)
            })
            .collect()
    }
}

pub(crate) struct SemanticLayer;

impl ValidationRule for SemanticLayer {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (segment, compiled) in input.compiled() {
            // Blocked text is reported by the security layer
            if input.policy.matches_blocked_pattern(&segment.expression).is_some() {
                continue;
            }
            let offset = segment.offset;
            let analysis = &compiled.analysis;

            for identifier in &analysis.free_identifiers {
                let name = identifier.value.as_str();
                if input.policy.is_allowed_global(name) {
                    continue;
                }
                let mut issue = ValidationIssue::error(
                    ValidationLayer::Semantic,
                    "undefined_variable",
                    format!("'{name}' is not defined"),
                )
                .at(input.template, offset + identifier.start, offset + identifier.end);
                let prefixed = format!("${name}");
                if input.policy.is_allowed_global(&prefixed) {
                    issue = issue.suggest(prefixed);
                }
                issues.push(issue);
            }

            for call in &analysis.method_calls {
                let name = call.value.as_str();
                if input.registry.is_known_method(name) || is_host_method(name) {
                    continue;
                }
                issues.push(
                    ValidationIssue::warning(
                        ValidationLayer::Semantic,
                        "unknown_method",
                        format!("'{name}' is not a known method"),
                    )
                    .at(input.template, offset + call.start, offset + call.end),
                );
            }

            if let Some(ctx) = input.context {
                for node in &analysis.node_references {
                    if node_is_known(ctx, &node.value) {
                        continue;
                    }
                    issues.push(
                        ValidationIssue::warning(
                            ValidationLayer::Semantic,
                            "unknown_node",
                            format!("node '{}' has no data in this context", node.value),
                        )
                        .at(input.template, offset + node.start, offset + node.end),
                    );
                }
            }
        }
        issues
    }
}

fn node_is_known(ctx: &ExpressionContext, node: &str) -> bool {
    ctx.node_output(node).is_some()
        || ctx
            .lineage()
            .is_some_and(|lineage| lineage.output_items(node).is_some())
}

pub(crate) struct SecurityLayer;

impl ValidationRule for SecurityLayer {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Security
    }

    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for segment in input.segments {
            if let Some(found) = input.policy.find_blocked_pattern(&segment.expression) {
                issues.push(
                    ValidationIssue::error(
                        ValidationLayer::Security,
                        "blocked_pattern",
                        format!("expression matches blocked pattern '{}'", found.rule),
                    )
                    .at(
                        input.template,
                        segment.offset + found.start,
                        segment.offset + found.end,
                    ),
                );
                continue;
            }
            let Some(Ok(compiled)) = &segment.compiled else {
                continue;
            };
            for assignment in &compiled.analysis.assignments {
                issues.push(
                    ValidationIssue::error(
                        ValidationLayer::Security,
                        "assignment",
                        "assignments are not allowed in expressions",
                    )
                    .at(
                        input.template,
                        segment.offset + assignment.start,
                        segment.offset + assignment.end,
                    ),
                );
            }
            if input.policy.strict_grammar() {
                for key in &compiled.analysis.computed_keys {
                    issues.push(
                        ValidationIssue::error(
                            ValidationLayer::Security,
                            "computed_member_access",
                            "computed member keys are rejected in strict mode",
                        )
                        .at(input.template, segment.offset + key.start, segment.offset + key.end),
                    );
                }
            }
        }
        issues
    }
}

pub(crate) struct PerformanceLayer;

impl PerformanceLayer {
    fn threshold(
        code_over: &'static str,
        code_near: &'static str,
        what: &str,
        actual: f64,
        limit: f64,
    ) -> Option<ValidationIssue> {
        if actual > limit {
            Some(ValidationIssue::error(
                ValidationLayer::Performance,
                code_over,
                format!("{what} {actual} exceeds the limit of {limit}"),
            ))
        } else if actual > limit * WARNING_RATIO {
            Some(ValidationIssue::warning(
                ValidationLayer::Performance,
                code_near,
                format!("{what} {actual} is close to the limit of {limit}"),
            ))
        } else {
            None
        }
    }
}

impl ValidationRule for PerformanceLayer {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Performance
    }

    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue> {
        let config = input.config;
        let mut issues = Vec::new();
        for segment in input.segments {
            let mut found = vec![Self::threshold(
                "max_length_exceeded",
                "expression_length",
                "expression length",
                segment.expression.len() as f64,
                config.max_expression_length as f64,
            )];
            if let Some(Ok(compiled)) = &segment.compiled {
                let analysis = &compiled.analysis;
                found.push(Self::threshold(
                    "max_depth_exceeded",
                    "nesting_depth",
                    "nesting depth",
                    analysis.depth as f64,
                    config.max_nesting_depth as f64,
                ));
                found.push(Self::threshold(
                    "max_complexity_exceeded",
                    "complexity",
                    "complexity",
                    f64::from(analysis.complexity),
                    f64::from(config.max_complexity),
                ));
                if analysis.nested_iterations > 0 {
                    found.push(Some(
                        ValidationIssue::warning(
                            ValidationLayer::Performance,
                            "nested_iteration",
                            "iteration callbacks nested inside other callbacks",
                        )
                        .suggest("precompute the inner collection once"),
                    ));
                }
            }
            issues.extend(
                found
                    .into_iter()
                    .flatten()
                    .map(|issue| issue.at(input.template, segment.from, segment.to)),
            );
        }
        issues
    }
}

pub(crate) struct BusinessLayer;

impl ValidationRule for BusinessLayer {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Business
    }

    fn check(&self, input: &LayerInput<'_>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for segment in input.segments {
            if segment.expression.trim().is_empty() {
                issues.push(
                    ValidationIssue::warning(
                        ValidationLayer::Business,
                        "empty_expression",
                        "expression is empty and evaluates to undefined",
                    )
                    .at(input.template, segment.from, segment.to),
                );
                continue;
            }
            let Some(Ok(compiled)) = &segment.compiled else {
                continue;
            };
            if compiled.analysis.legacy_node_access {
                let example = compiled
                    .analysis
                    .node_references
                    .first()
                    .map_or_else(|| "$(\"Node\")".to_string(), |n| format!("$(\"{}\")", n.value));
                issues.push(
                    ValidationIssue::warning(
                        ValidationLayer::Business,
                        "legacy_node_access",
                        "$node[...] is deprecated",
                    )
                    .at(input.template, segment.from, segment.to)
                    .suggest(format!("use {example}.item instead")),
                );
            }
        }

        let count = input.segments.len();
        if count > input.config.max_expressions {
            issues.push(ValidationIssue::warning(
                ValidationLayer::Business,
                "too_many_expressions",
                format!(
                    "template has {count} expressions, more than the recommended {}",
                    input.config.max_expressions
                ),
            ));
        }
        issues
    }
}
