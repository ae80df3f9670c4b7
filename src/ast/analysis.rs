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

//! Static analysis over parsed expressions
//!
//! A single pass collects everything the cache, the validator and the completion
//! provider need to know about an expression without evaluating it: which context
//! data it reads, which identifiers are free, how deep and costly it is, and
//! whether its value depends on the wall clock.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::expression::{Expression, Literal, Node};
use super::visitor::{Visitor, walk_expression};
use crate::parser::span::Spanned;

/// Context roots whose data can be sliced per key for cache fingerprints
pub const SLICEABLE_ROOTS: &[&str] = &["$json", "$env"];

/// Context roots that read item lineage and cannot be sliced
pub const LINEAGE_ROOTS: &[&str] = &["$", "$node", "$input"];

/// Scalar context roots
pub const SCALAR_ROOTS: &[&str] = &["$runIndex", "$itemIndex"];

/// Roots whose value depends on the wall clock
pub const VOLATILE_ROOTS: &[&str] = &["$now", "$today"];

/// Array methods that invoke a callback per element
pub const ITERATION_METHODS: &[&str] = &[
    "map", "filter", "reduce", "find", "findIndex", "some", "every", "forEach", "flatMap", "sort",
    "sortBy", "groupBy",
];

/// A piece of context data an expression reads
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Dependency {
    /// Context root (`$json`, `$env`, `$runIndex`, ...)
    pub root: String,
    /// First-level key, `None` when the whole root is read
    pub key: Option<String>,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{}", self.root, key),
            None => f.write_str(&self.root),
        }
    }
}

/// Result of analyzing one expression
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionAnalysis {
    /// Context data read by the expression
    pub dependencies: BTreeSet<Dependency>,
    /// False when the expression reads data that cannot be sliced (lineage, dynamic roots)
    pub dependencies_complete: bool,
    /// Reads the wall clock; results must not be cached
    pub volatile: bool,
    /// Identifiers not bound by an enclosing lambda
    pub free_identifiers: Vec<Spanned<String>>,
    /// Names of methods called (`x.trim()` gives `trim`)
    pub method_calls: Vec<Spanned<String>>,
    /// Statically known node names referenced via `$("...")` or `$node[...]`
    pub node_references: Vec<Spanned<String>>,
    /// Uses the legacy `$node[...]` accessor
    pub legacy_node_access: bool,
    /// Index accesses whose key is not a literal
    pub computed_keys: Vec<Spanned<()>>,
    /// Assignment expressions
    pub assignments: Vec<Spanned<()>>,
    /// Iteration callbacks nested inside other callbacks
    pub nested_iterations: usize,
    /// Weighted node count
    pub complexity: u32,
    /// Maximum nesting depth of the tree
    pub depth: usize,
    /// Total number of nodes
    pub node_count: usize,
}

impl ExpressionAnalysis {
    /// Dependencies rendered as dotted paths
    pub fn dependency_paths(&self) -> Vec<String> {
        self.dependencies.iter().map(ToString::to_string).collect()
    }
}

/// Analyze a parsed expression
pub fn analyze(node: &Node) -> ExpressionAnalysis {
    let mut analyzer = Analyzer {
        result: ExpressionAnalysis {
            dependencies_complete: true,
            ..Default::default()
        },
        scopes: Vec::new(),
        current_depth: 0,
        qualified_root: false,
    };
    analyzer.visit_expression(node);
    analyzer.result
}

struct Analyzer {
    result: ExpressionAnalysis,
    scopes: Vec<Vec<String>>,
    current_depth: usize,
    qualified_root: bool,
}

impl Analyzer {
    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.iter().any(|p| p == name))
    }

    /// Context root named by `node` when it is a bare, unshadowed identifier
    fn context_root<'n>(&self, node: &'n Node) -> Option<&'n str> {
        match &node.value {
            Expression::Identifier(name) if name.starts_with('$') && !self.is_local(name) => {
                Some(name)
            }
            _ => None,
        }
    }

    fn record(&mut self, root: &str, key: Option<String>) {
        if VOLATILE_ROOTS.contains(&root) {
            self.result.volatile = true;
            return;
        }
        if LINEAGE_ROOTS.contains(&root) {
            self.result.dependencies_complete = false;
        }
        let key = if SLICEABLE_ROOTS.contains(&root) {
            key
        } else {
            None
        };
        self.result.dependencies.insert(Dependency {
            root: root.to_string(),
            key,
        });
    }

    fn weight(node: &Node) -> u32 {
        match &node.value {
            Expression::Call { .. } => 3,
            Expression::Lambda { .. } | Expression::Conditional { .. } => 2,
            _ => 1,
        }
    }
}

fn literal_key(node: &Node) -> Option<String> {
    match &node.value {
        Expression::Literal(Literal::String(s)) => Some(s.clone()),
        Expression::Literal(Literal::Number(n)) => Some(crate::model::format_number(*n)),
        _ => None,
    }
}

impl Visitor for Analyzer {
    fn visit_expression(&mut self, node: &Node) {
        self.current_depth += 1;
        self.result.depth = self.result.depth.max(self.current_depth);
        self.result.node_count += 1;
        self.result.complexity += Self::weight(node);

        match &node.value {
            Expression::Member {
                object, property, ..
            } => {
                if let Some(root) = self.context_root(object) {
                    if root == "$node" {
                        self.result.legacy_node_access = true;
                        self.result.node_references.push(Spanned::new(
                            property.clone(),
                            node.start,
                            node.end,
                        ));
                    }
                    let root = root.to_string();
                    self.record(&root, Some(property.clone()));
                    self.qualified_root = true;
                } else if matches!(&object.value, Expression::Identifier(name) if name == "DateTime")
                    && matches!(property.as_str(), "now" | "local" | "today")
                {
                    self.result.volatile = true;
                }
            }
            Expression::Index { object, index, .. } => {
                let key = literal_key(index);
                if key.is_none() {
                    self.result
                        .computed_keys
                        .push(Spanned::new((), index.start, index.end));
                }
                if let Some(root) = self.context_root(object) {
                    if root == "$node" {
                        self.result.legacy_node_access = true;
                        match &key {
                            Some(name) => self.result.node_references.push(Spanned::new(
                                name.clone(),
                                index.start,
                                index.end,
                            )),
                            None => self.result.dependencies_complete = false,
                        }
                    }
                    let root = root.to_string();
                    self.record(&root, key);
                    self.qualified_root = true;
                }
            }
            Expression::Assign { .. } => {
                self.result
                    .assignments
                    .push(Spanned::new((), node.start, node.end));
            }
            _ => {}
        }

        walk_expression(self, node);
        self.current_depth -= 1;
    }

    fn visit_identifier(&mut self, node: &Node, name: &str) {
        let qualified = std::mem::take(&mut self.qualified_root);
        if self.is_local(name) {
            return;
        }
        self.result
            .free_identifiers
            .push(Spanned::new(name.to_string(), node.start, node.end));
        if name.starts_with('$') && !qualified {
            self.record(name, None);
        }
    }

    fn visit_call(&mut self, node: &Node, callee: &Node, arguments: &[Node]) {
        match &callee.value {
            Expression::Identifier(name) if name == "$" && !self.is_local(name) => {
                match arguments.first().and_then(literal_key) {
                    Some(target) => {
                        let first = &arguments[0];
                        self.result.node_references.push(Spanned::new(
                            target,
                            first.start,
                            first.end,
                        ))
                    }
                    None => self.result.dependencies_complete = false,
                }
            }
            Expression::Member {
                object, property, ..
            } => {
                self.result
                    .method_calls
                    .push(Spanned::new(property.clone(), node.start, node.end));
                if !self.scopes.is_empty() && ITERATION_METHODS.contains(&property.as_str()) {
                    self.result.nested_iterations += 1;
                }
                // A method on the root itself reads the whole root
                if let Some(root) = self.context_root(object) {
                    let root = root.to_string();
                    self.record(&root, None);
                }
            }
            _ => {}
        }
    }

    fn enter_lambda(&mut self, params: &[String]) {
        self.scopes.push(params.to_vec());
    }

    fn leave_lambda(&mut self, _params: &[String]) {
        self.scopes.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use pretty_assertions::assert_eq;

    fn analyze_text(text: &str) -> ExpressionAnalysis {
        let node = parse_expression(text).expect("expression should parse");
        analyze(&node)
    }

    #[test]
    fn collects_first_level_json_keys() {
        let analysis = analyze_text("$json.user.name + $json['count']");
        assert_eq!(
            analysis.dependency_paths(),
            vec!["$json.count".to_string(), "$json.user".to_string()]
        );
        assert!(analysis.dependencies_complete);
        assert!(!analysis.volatile);
    }

    #[test]
    fn method_on_root_reads_whole_root() {
        let analysis = analyze_text("$json.keys().length");
        assert!(
            analysis
                .dependencies
                .iter()
                .any(|d| d.root == "$json" && d.key.is_none())
        );
    }

    #[test]
    fn computed_key_reads_whole_root() {
        let analysis = analyze_text("$json[$itemIndex]");
        assert_eq!(
            analysis.dependency_paths(),
            vec!["$itemIndex".to_string(), "$json".to_string()]
        );
        assert_eq!(analysis.computed_keys.len(), 1);
    }

    #[test]
    fn clock_reads_are_volatile() {
        assert!(analyze_text("$now.toISO()").volatile);
        assert!(analyze_text("DateTime.now().year").volatile);
        assert!(!analyze_text("DateTime.fromISO('2024-01-01')").volatile);
    }

    #[test]
    fn lambda_parameters_are_not_free() {
        let analysis = analyze_text("$json.items.map(item => item.price * rate)");
        let free: Vec<&str> = analysis
            .free_identifiers
            .iter()
            .map(|s| s.value.as_str())
            .collect();
        assert_eq!(free, vec!["$json", "rate"]);
    }

    #[test]
    fn node_references_are_collected() {
        let analysis = analyze_text("$('Webhook').item.json.id + $node[\"HTTP Request\"].json.a");
        let names: Vec<&str> = analysis
            .node_references
            .iter()
            .map(|s| s.value.as_str())
            .collect();
        assert_eq!(names, vec!["Webhook", "HTTP Request"]);
        assert!(analysis.legacy_node_access);
        assert!(!analysis.dependencies_complete);
    }

    #[test]
    fn nested_iteration_is_counted() {
        let analysis = analyze_text("$json.rows.map(r => r.cells.filter(c => c > 0))");
        assert_eq!(analysis.nested_iterations, 1);
        assert!(analysis.depth >= 4);
        assert!(analysis.complexity > analysis.node_count as u32);
    }

    #[test]
    fn assignments_are_recorded() {
        let analysis = analyze_text("$json.a = 1");
        assert_eq!(analysis.assignments.len(), 1);
    }
}
