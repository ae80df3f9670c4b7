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

//! Template segmentation
//!
//! A template is literal text interleaved with `{{ expression }}` spans. The
//! scanner tracks brace depth and string literals inside an expression so that
//! object literals and quoted braces do not end the span early. Segments are
//! contiguous: concatenating their source slices gives back the template.

use serde::Serialize;

use super::tokenizer::ParseResult;
use crate::error::{ParseError, ParseErrorKind};

/// Opening delimiter
pub const OPEN: &str = "{{";
/// Closing delimiter
pub const CLOSE: &str = "}}";

/// Where a resolvable segment is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpressionRoute {
    /// JSON-path query against `$json` (`$.a.b`, `$[0]`)
    JsonQuery,
    /// Sandboxed interpreter
    Evaluator,
}

impl ExpressionRoute {
    /// Route for an inner expression text
    pub fn for_expression(expression: &str) -> Self {
        let trimmed = expression.trim();
        if trimmed == "$" || trimmed.starts_with("$.") || trimmed.starts_with("$[") {
            ExpressionRoute::JsonQuery
        } else {
            ExpressionRoute::Evaluator
        }
    }
}

/// One span of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Segment {
    /// Plain text copied to the output
    Literal {
        /// Start offset (inclusive)
        from: usize,
        /// End offset (exclusive)
        to: usize,
        /// The text
        text: String,
    },
    /// `{{ expression }}` including its delimiters
    #[serde(rename_all = "camelCase")]
    Resolvable {
        /// Offset of `{{`
        from: usize,
        /// Offset just past `}}`
        to: usize,
        /// Inner text with delimiters stripped
        expression: String,
        /// Offset of the inner text in the template
        expression_offset: usize,
    },
}

impl Segment {
    /// Start offset
    pub fn from(&self) -> usize {
        match self {
            Segment::Literal { from, .. } | Segment::Resolvable { from, .. } => *from,
        }
    }

    /// End offset
    pub fn to(&self) -> usize {
        match self {
            Segment::Literal { to, .. } | Segment::Resolvable { to, .. } => *to,
        }
    }

    /// Check if this is a resolvable segment
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Segment::Resolvable { .. })
    }
}

/// A segmented template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    /// Raw template text
    pub source: String,
    /// Ordered, contiguous segments
    pub segments: Vec<Segment>,
}

impl Template {
    /// Resolvable segments in order
    pub fn resolvables(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_resolvable())
    }

    /// Number of resolvable segments
    pub fn expression_count(&self) -> usize {
        self.resolvables().count()
    }

    /// The lone resolvable segment when every other segment is whitespace
    ///
    /// Such templates evaluate to the typed value instead of a string.
    pub fn single_expression(&self) -> Option<&Segment> {
        let mut found = None;
        for segment in &self.segments {
            match segment {
                Segment::Literal { text, .. } if text.trim().is_empty() => {}
                Segment::Literal { .. } => return None,
                resolvable => {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(resolvable);
                }
            }
        }
        found
    }

    /// Concatenate segment slices; always equals `source`
    pub fn reconstruct(&self) -> String {
        self.segments
            .iter()
            .map(|s| &self.source[s.from()..s.to()])
            .collect()
    }
}

/// Split a template into literal and resolvable segments
///
/// Fails on the first unmatched delimiter: a `}}` in literal text, or a `{{`
/// whose expression never closes (reported at the opening offset).
pub fn parse_template(source: &str) -> ParseResult<Template> {
    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let next_open = rest.find(OPEN);
        let next_close = rest.find(CLOSE);

        if let Some(close) = next_close {
            if next_open.is_none_or(|open| close < open) {
                return Err(ParseError::new(
                    ParseErrorKind::UnmatchedClose,
                    pos + close,
                    "Closing '}}' without matching '{{'",
                ));
            }
        }

        let Some(open) = next_open else {
            segments.push(Segment::Literal {
                from: pos,
                to: source.len(),
                text: rest.to_string(),
            });
            break;
        };

        if open > 0 {
            segments.push(Segment::Literal {
                from: pos,
                to: pos + open,
                text: rest[..open].to_string(),
            });
        }

        let open_at = pos + open;
        let inner_start = open_at + OPEN.len();
        let inner_end = find_expression_end(source, inner_start).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::UnmatchedOpen,
                open_at,
                "Opening '{{' without matching '}}'",
            )
        })?;
        segments.push(Segment::Resolvable {
            from: open_at,
            to: inner_end + CLOSE.len(),
            expression: source[inner_start..inner_end].to_string(),
            expression_offset: inner_start,
        });
        pos = inner_end + CLOSE.len();
    }

    Ok(Template {
        source: source.to_string(),
        segments,
    })
}

/// Offset of the `}}` that closes an expression starting at `start`
fn find_expression_end(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = start;

    while i < bytes.len() {
        let byte = bytes[i];
        if let Some(q) = quote {
            match byte {
                b'\\' => i += 1,
                _ if byte == q => quote = None,
                _ => {}
            }
            i += 1;
            continue;
        }
        match byte {
            b'\'' | b'"' | b'`' => quote = Some(byte),
            b'{' => depth += 1,
            b'}' if depth == 0 && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn splits_literals_and_expressions() {
        let template = parse_template("Hello {{ $json.name }}!").expect("parse");
        assert_eq!(
            template.segments,
            vec![
                Segment::Literal {
                    from: 0,
                    to: 6,
                    text: "Hello ".to_string()
                },
                Segment::Resolvable {
                    from: 6,
                    to: 22,
                    expression: " $json.name ".to_string(),
                    expression_offset: 8
                },
                Segment::Literal {
                    from: 22,
                    to: 23,
                    text: "!".to_string()
                },
            ]
        );
    }

    #[test]
    fn object_literal_braces_do_not_close_expression() {
        let template = parse_template("{{ {a: {b: 1}} }}").expect("parse");
        assert_eq!(template.segments.len(), 1);
        assert!(matches!(
            &template.segments[0],
            Segment::Resolvable { expression, .. } if expression == " {a: {b: 1}} "
        ));

        let tight = parse_template("{{ {a: 1}}}").expect("parse");
        assert!(matches!(
            &tight.segments[0],
            Segment::Resolvable { expression, to: 11, .. } if expression == " {a: 1}"
        ));
    }

    #[test]
    fn quoted_braces_are_ignored() {
        let template = parse_template("{{ '}}' + \"{{\" }}").expect("parse");
        assert_eq!(template.expression_count(), 1);
    }

    #[rstest]
    #[case("", 0)]
    #[case("plain text", 1)]
    #[case("{{a}}{{b}}", 2)]
    #[case("a {{ 1 }} b {{ 2 }} c", 5)]
    #[case("{{ 'ü' }} – ✓", 2)]
    fn segments_reconstruct_source(#[case] source: &str, #[case] count: usize) {
        let template = parse_template(source).expect("parse");
        assert_eq!(template.segments.len(), count);
        assert_eq!(template.reconstruct(), source);
        for pair in template.segments.windows(2) {
            assert_eq!(pair[0].to(), pair[1].from());
        }
    }

    #[test]
    fn unmatched_open_reports_opening_offset() {
        let err = parse_template("ok {{ 1 + 1 } done").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnmatchedOpen);
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn unmatched_close_reports_offset() {
        let err = parse_template("value }} here").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnmatchedClose);
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn single_expression_allows_surrounding_whitespace() {
        let template = parse_template("  {{ 1 }}\n").expect("parse");
        assert!(template.single_expression().is_some());
        let mixed = parse_template("n = {{ 1 }}").expect("parse");
        assert!(mixed.single_expression().is_none());
    }

    #[rstest]
    #[case("$.items[0]", ExpressionRoute::JsonQuery)]
    #[case(" $ ", ExpressionRoute::JsonQuery)]
    #[case("$['a']", ExpressionRoute::JsonQuery)]
    #[case("$json.items", ExpressionRoute::Evaluator)]
    #[case("$('Node').item", ExpressionRoute::Evaluator)]
    fn routes_json_path_queries(#[case] expression: &str, #[case] route: ExpressionRoute) {
        assert_eq!(ExpressionRoute::for_expression(expression), route);
    }
}
