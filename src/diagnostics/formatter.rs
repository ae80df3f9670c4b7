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

//! Formatting validation issues for different output formats

use crate::error::ErrorLevel;
use crate::validation::ValidationIssue;

/// Output format for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text with the offending source line
    Text,
    /// JSON array
    Json,
    /// One line per issue
    Compact,
}

/// Formatter for validation issues
#[derive(Debug, Clone)]
pub struct DiagnosticFormatter {
    format: Format,
    show_code: bool,
    show_suggestions: bool,
}

impl DiagnosticFormatter {
    /// Create a new formatter
    pub fn new(format: Format) -> Self {
        Self {
            format,
            show_code: true,
            show_suggestions: true,
        }
    }

    /// Set whether to show issue codes
    pub fn with_code(mut self, show: bool) -> Self {
        self.show_code = show;
        self
    }

    /// Set whether to show suggestions
    pub fn with_suggestions(mut self, show: bool) -> Self {
        self.show_suggestions = show;
        self
    }

    /// Format one issue found in `source`
    pub fn format(&self, issue: &ValidationIssue, source: &str) -> String {
        match self.format {
            Format::Text => self.format_text(issue, source),
            Format::Json => serde_json::to_string_pretty(issue).unwrap_or_default(),
            Format::Compact => self.format_compact(issue),
        }
    }

    /// Format several issues
    pub fn format_all<'a>(
        &self,
        issues: impl IntoIterator<Item = &'a ValidationIssue>,
        source: &str,
    ) -> String {
        let issues: Vec<&ValidationIssue> = issues.into_iter().collect();
        match self.format {
            Format::Text => issues
                .iter()
                .map(|issue| self.format_text(issue, source))
                .collect::<Vec<_>>()
                .join("\n"),
            Format::Json => serde_json::to_string_pretty(&issues).unwrap_or_default(),
            Format::Compact => issues
                .iter()
                .map(|issue| self.format_compact(issue))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn format_text(&self, issue: &ValidationIssue, source: &str) -> String {
        let mut result = format!("{}: {}", level_name(issue.level), issue.message);
        if self.show_code {
            result.push_str(&format!(" [{}/{}]", issue.layer, issue.code));
        }
        result.push('\n');

        if let Some(location) = issue.location {
            result.push_str(&format!(" --> {location}\n"));
            if let Some(line) = source.lines().nth(location.line - 1) {
                result.push_str(&format!("{:4} | {}\n", location.line, line));
                let width = source[location.start..location.end.min(source.len())]
                    .lines()
                    .next()
                    .map_or(1, |text| text.chars().count().max(1));
                result.push_str("     | ");
                result.push_str(&" ".repeat(location.column - 1));
                result.push_str(&"^".repeat(width));
                result.push('\n');
            }
        }

        if self.show_suggestions {
            if let Some(suggestion) = &issue.suggestion {
                result.push_str(&format!("  = help: {suggestion}\n"));
            }
        }
        result
    }

    fn format_compact(&self, issue: &ValidationIssue) -> String {
        let location = issue
            .location
            .map_or_else(|| "-".to_string(), |l| format!("{}:{}", l.line, l.column));
        let code = if self.show_code {
            format!("[{}] ", issue.code)
        } else {
            String::new()
        };
        format!(
            "{location}: {}: {code}{}",
            level_name(issue.level),
            issue.message
        )
    }
}

impl Default for DiagnosticFormatter {
    fn default() -> Self {
        Self::new(Format::Text)
    }
}

fn level_name(level: ErrorLevel) -> &'static str {
    match level {
        ErrorLevel::Warning => "warning",
        ErrorLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationLayer;

    fn issue() -> ValidationIssue {
        ValidationIssue::error(ValidationLayer::Semantic, "undefined_variable", "'foo' is not defined")
            .at("x\n{{ foo }}", 5, 8)
            .suggest("$foo")
    }

    #[test]
    fn text_format_underlines_the_range() {
        let output = DiagnosticFormatter::new(Format::Text).format(&issue(), "x\n{{ foo }}");
        assert!(output.contains("error: 'foo' is not defined [semantic/undefined_variable]"));
        assert!(output.contains("   2 | {{ foo }}"));
        assert!(output.contains("     |    ^^^"));
        assert!(output.contains("help: $foo"));
    }

    #[test]
    fn compact_format_is_one_line() {
        let output = DiagnosticFormatter::new(Format::Compact)
            .with_code(false)
            .format(&issue(), "");
        assert_eq!(output, "2:4: error: 'foo' is not defined");
    }

    #[test]
    fn json_format_lists_every_issue() {
        let issues = [issue(), issue()];
        let output = DiagnosticFormatter::new(Format::Json).format_all(&issues, "");
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));
        assert_eq!(parsed[0]["code"], "undefined_variable");
    }
}
