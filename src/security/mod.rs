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

//! Security policy for expression evaluation
//!
//! The policy is immutable once built. It never executes anything: it answers
//! whether text matches a blocked rule and whether a global or method name may
//! be used. Matching is pattern based and therefore incomplete against an
//! adaptive author; `strict_grammar` additionally rejects computed member keys.

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Rule names that must always be active, whatever the host configures
pub const MANDATORY_RULES: &[&str] = &["eval", "function_constructor"];

/// Default global names visible to expressions
pub const DEFAULT_ALLOWED_GLOBALS: &[&str] = &[
    "$json",
    "$node",
    "$env",
    "$now",
    "$today",
    "$runIndex",
    "$itemIndex",
    "$input",
    "$",
    "Math",
    "JSON",
    "Object",
    "Array",
    "Number",
    "String",
    "Boolean",
    "DateTime",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
];

/// A named blocked-pattern rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPattern {
    /// Rule name reported in violations
    pub name: String,
    /// Regular expression matched against the raw expression text
    pub pattern: String,
}

impl BlockedPattern {
    /// Create a new rule
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Default rule list, in match order
pub fn default_blocked_patterns() -> Vec<BlockedPattern> {
    vec![
        BlockedPattern::new("eval", r"\beval\s*\("),
        BlockedPattern::new("function_constructor", r"\bFunction\s*\("),
        BlockedPattern::new("prototype_access", r"\b(?:constructor|__proto__|prototype)\b"),
        BlockedPattern::new("process_access", r"\bprocess\b"),
        BlockedPattern::new("require", r"\brequire\s*\("),
        BlockedPattern::new("dynamic_import", r"\bimport\s*\("),
        BlockedPattern::new("global_object", r"\b(?:globalThis|global|window)\b"),
        BlockedPattern::new("timers", r"\b(?:setTimeout|setInterval|setImmediate)\s*\("),
    ]
}

fn mandatory_pattern(name: &str) -> Option<BlockedPattern> {
    default_blocked_patterns()
        .into_iter()
        .find(|rule| rule.name == name)
}

/// Security settings, immutable for an engine's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Wall-clock deadline per evaluation, in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Approximate allocation ceiling per evaluation, in bytes
    pub max_memory: u64,
    /// Nesting ceiling for evaluation and lambda calls
    pub max_call_stack_size: usize,
    /// Free identifiers expressions may resolve
    pub allowed_globals: Vec<String>,
    /// Methods that may be called; empty allows every registered method
    pub allowed_methods: Vec<String>,
    /// Ordered blocked-pattern rules
    pub blocked_patterns: Vec<BlockedPattern>,
    /// Must stay false; runtime code construction is never permitted
    pub allow_function_constructor: bool,
    /// Reject computed member access with non-literal keys
    pub strict_grammar: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_memory: 10 * 1024 * 1024,
            max_call_stack_size: 100,
            allowed_globals: DEFAULT_ALLOWED_GLOBALS
                .iter()
                .map(ToString::to_string)
                .collect(),
            allowed_methods: Vec::new(),
            blocked_patterns: default_blocked_patterns(),
            allow_function_constructor: false,
            strict_grammar: false,
        }
    }
}

impl SecurityConfig {
    /// Wall-clock deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check limits and flags; patterns are checked when the policy compiles them
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "security.timeout",
            });
        }
        if self.max_call_stack_size == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "security.maxCallStackSize",
            });
        }
        if self.max_memory == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "security.maxMemory",
            });
        }
        if self.allow_function_constructor {
            return Err(ConfigError::FunctionConstructorNotAllowed);
        }
        Ok(())
    }
}

/// Where a blocked rule matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedMatch<'a> {
    /// Rule name
    pub rule: &'a str,
    /// Match start in the checked text
    pub start: usize,
    /// Match end in the checked text
    pub end: usize,
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    regex: Regex,
}

/// Compiled, immutable security policy
#[derive(Debug)]
pub struct SecurityPolicy {
    config: SecurityConfig,
    rules: Vec<CompiledRule>,
    globals: FxHashSet<String>,
    methods: FxHashSet<String>,
}

impl SecurityPolicy {
    /// Compile a policy; the mandatory code-construction rules are appended when missing
    ///
    /// A host rule only stands in for a mandatory one when both name and pattern
    /// match, so reusing the name cannot weaken the rule.
    pub fn new(config: SecurityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut patterns = config.blocked_patterns.clone();
        for mandatory in MANDATORY_RULES.iter().filter_map(|name| mandatory_pattern(name)) {
            if !patterns.contains(&mandatory) {
                patterns.push(mandatory);
            }
        }

        let rules = patterns
            .into_iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        name: rule.name.clone(),
                        regex,
                    })
                    .map_err(|e| ConfigError::InvalidPattern {
                        name: rule.name,
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let globals = config.allowed_globals.iter().cloned().collect();
        let methods = config.allowed_methods.iter().cloned().collect();
        log::debug!(
            "security policy compiled with {} blocked rules, {} globals",
            rules.len(),
            config.allowed_globals.len()
        );

        Ok(Self {
            config,
            rules,
            globals,
            methods,
        })
    }

    /// Name of the first rule matching `text`
    pub fn matches_blocked_pattern(&self, text: &str) -> Option<&str> {
        self.find_blocked_pattern(text).map(|m| m.rule)
    }

    /// First matching rule with its position
    pub fn find_blocked_pattern(&self, text: &str) -> Option<BlockedMatch<'_>> {
        self.rules.iter().find_map(|rule| {
            rule.regex.find(text).map(|m| BlockedMatch {
                rule: &rule.name,
                start: m.start(),
                end: m.end(),
            })
        })
    }

    /// Whether a free identifier may be resolved
    pub fn is_allowed_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    /// Whether a method may be called
    pub fn is_allowed_method(&self, name: &str) -> bool {
        self.methods.is_empty() || self.methods.contains(name)
    }

    /// Allowed global names, in configured order
    pub fn allowed_globals(&self) -> &[String] {
        &self.config.allowed_globals
    }

    /// Underlying configuration
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Wall-clock deadline
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Memory ceiling in bytes
    pub fn max_memory(&self) -> u64 {
        self.config.max_memory
    }

    /// Call-stack ceiling
    pub fn max_call_stack_size(&self) -> usize {
        self.config.max_call_stack_size
    }

    /// Whether computed member keys are rejected
    pub fn strict_grammar(&self) -> bool {
        self.config.strict_grammar
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        let config = SecurityConfig::default();
        let rules = default_blocked_patterns()
            .into_iter()
            .filter_map(|rule| {
                Regex::new(&rule.pattern).ok().map(|regex| CompiledRule {
                    name: rule.name,
                    regex,
                })
            })
            .collect();
        let globals = config.allowed_globals.iter().cloned().collect();
        Self {
            config,
            rules,
            globals,
            methods: FxHashSet::default(),
        }
    }
}
