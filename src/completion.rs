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

//! Completion provider for template expressions
//!
//! Completion is purely textual: the text between the nearest open `{{` and
//! the cursor is inspected, never parsed or evaluated, so half-typed
//! expressions still get suggestions.

use serde::Serialize;
use std::sync::Arc;

use crate::context::ExpressionContext;
use crate::model::{
    INPUT_METHODS, NODE_REF_METHODS, NODE_REF_PROPERTIES, Namespace, Value, ValueKind,
};
use crate::registry::{ExtensionRegistry, MethodEntry};

const KEYWORDS: &[&str] = &["true", "false", "null", "undefined", "typeof"];

/// Kind of completion item, in ranking order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    /// Context binding, namespace or data key
    Variable,
    /// Callable global
    Function,
    /// Method or member of the receiver
    Method,
    /// Language keyword
    Keyword,
}

/// A completion suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    /// What the user sees
    pub label: String,
    /// Item kind
    pub kind: CompletionKind,
    /// Signature or short description
    pub detail: Option<String>,
    /// Text inserted when the item is accepted
    pub insert_text: String,
}

impl CompletionItem {
    fn new(label: impl Into<String>, kind: CompletionKind, detail: Option<String>) -> Self {
        let label = label.into();
        let insert_text = match kind {
            CompletionKind::Function | CompletionKind::Method if !label.ends_with(')') => {
                format!("{label}()")
            }
            _ => label.clone(),
        };
        Self {
            label,
            kind,
            detail,
            insert_text,
        }
    }

    fn from_method(entry: &MethodEntry) -> Self {
        Self::new(entry.name, CompletionKind::Method, Some(entry.doc.signature.to_string()))
    }
}

/// What the text before the cursor asks for
#[derive(Debug, PartialEq)]
enum Request<'a> {
    Global { prefix: &'a str },
    Member { receiver: &'a str, prefix: &'a str },
}

/// Receiver category inferred from its text
#[derive(Debug, Clone, Copy, PartialEq)]
enum Receiver {
    Value(ValueKind),
    Namespace(Namespace),
    NodeRef,
    Input,
    Json,
    Env,
    Unknown,
}

/// Suggests globals, keywords and methods at a cursor position
#[derive(Debug, Clone)]
pub struct CompletionProvider {
    registry: Arc<ExtensionRegistry>,
    globals: Vec<String>,
}

impl CompletionProvider {
    /// Create a provider offering `globals` at expression start
    pub fn new(registry: Arc<ExtensionRegistry>, globals: Vec<String>) -> Self {
        Self { registry, globals }
    }

    /// Candidates at byte offset `cursor`; empty outside an expression
    pub fn complete(&self, template: &str, cursor: usize) -> Vec<CompletionItem> {
        self.suggest(template, cursor, None)
    }

    /// Like [`complete`](Self::complete), also offering keys of `$json` and `$env`
    pub fn complete_in_context(
        &self,
        template: &str,
        cursor: usize,
        ctx: &ExpressionContext,
    ) -> Vec<CompletionItem> {
        self.suggest(template, cursor, Some(ctx))
    }

    fn suggest(
        &self,
        template: &str,
        cursor: usize,
        ctx: Option<&ExpressionContext>,
    ) -> Vec<CompletionItem> {
        let Some(expression) = expression_before(template, cursor) else {
            return Vec::new();
        };
        let (prefix, mut items) = match parse_request(expression) {
            Request::Global { prefix } => (prefix, self.globals_and_keywords()),
            Request::Member { receiver, prefix } => {
                (prefix, self.members(infer_receiver(receiver), ctx))
            }
        };
        items.retain(|item| item.label.to_lowercase().starts_with(&prefix.to_lowercase()));
        rank(&mut items, prefix);
        items
    }

    fn globals_and_keywords(&self) -> Vec<CompletionItem> {
        let mut items: Vec<CompletionItem> = self
            .globals
            .iter()
            .map(|name| {
                let callable = name == "$"
                    || name.starts_with(|c: char| c.is_ascii_lowercase())
                    || matches!(name.as_str(), "String" | "Boolean");
                let kind = if callable {
                    CompletionKind::Function
                } else {
                    CompletionKind::Variable
                };
                let label = if name == "$" { "$(\"\")" } else { name.as_str() };
                CompletionItem::new(label, kind, global_detail(name).map(String::from))
            })
            .collect();
        items.extend(
            KEYWORDS
                .iter()
                .map(|k| CompletionItem::new(*k, CompletionKind::Keyword, None)),
        );
        items
    }

    fn members(&self, receiver: Receiver, ctx: Option<&ExpressionContext>) -> Vec<CompletionItem> {
        match receiver {
            Receiver::Value(kind) => self
                .registry
                .methods_for(kind)
                .map(CompletionItem::from_method)
                .chain(value_properties(kind))
                .collect(),
            Receiver::Namespace(namespace) => namespace
                .functions()
                .iter()
                .map(|f| CompletionItem::new(*f, CompletionKind::Method, Some(namespace.name().to_string())))
                .chain(namespace.constants().iter().map(|c| {
                    CompletionItem::new(*c, CompletionKind::Variable, Some(namespace.name().to_string()))
                }))
                .collect(),
            Receiver::NodeRef => NODE_REF_METHODS
                .iter()
                .map(|m| CompletionItem::new(*m, CompletionKind::Method, Some("node reference".into())))
                .chain(NODE_REF_PROPERTIES.iter().map(|p| {
                    CompletionItem::new(*p, CompletionKind::Variable, Some("node reference".into()))
                }))
                .collect(),
            Receiver::Input => INPUT_METHODS
                .iter()
                .map(|m| CompletionItem::new(*m, CompletionKind::Method, Some("input items".into())))
                .chain(std::iter::once(CompletionItem::new(
                    "item",
                    CompletionKind::Variable,
                    Some("current input item".into()),
                )))
                .collect(),
            Receiver::Json => match ctx.map(ExpressionContext::json) {
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(key, value)| {
                        CompletionItem::new(key.as_str(), CompletionKind::Variable, Some(value.type_tag().into()))
                    })
                    .chain(self.registry.methods_for(ValueKind::Object).map(CompletionItem::from_method))
                    .collect(),
                _ => self.all_methods(),
            },
            Receiver::Env => match ctx {
                Some(ctx) => ctx
                    .env()
                    .names()
                    .map(|name| CompletionItem::new(name, CompletionKind::Variable, Some("environment".into())))
                    .collect(),
                None => self.all_methods(),
            },
            Receiver::Unknown => self.all_methods(),
        }
    }

    fn all_methods(&self) -> Vec<CompletionItem> {
        self.registry
            .all_methods()
            .into_iter()
            .map(CompletionItem::from_method)
            .collect()
    }
}

/// Expression text between the innermost open `{{` and the cursor
fn expression_before(template: &str, cursor: usize) -> Option<&str> {
    let cursor = cursor.min(template.len());
    if !template.is_char_boundary(cursor) {
        return None;
    }
    let before = &template[..cursor];
    let open = before.rfind("{{")?;
    let inner = &before[open + 2..];
    (!inner.contains("}}")).then_some(inner)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn parse_request(expression: &str) -> Request<'_> {
    let start = expression
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_identifier_char(*c))
        .last()
        .map_or(expression.len(), |(i, _)| i);
    let prefix = &expression[start..];
    let head = &expression[..start];
    match head.strip_suffix('.') {
        Some(receiver) => {
            let receiver = receiver.strip_suffix('?').unwrap_or(receiver).trim();
            Request::Member { receiver, prefix }
        }
        None => Request::Global { prefix },
    }
}

/// Innermost receiver expression, e.g. `$json.name` for `$json.name`
fn receiver_tail(receiver: &str) -> &str {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in receiver.char_indices().rev() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            ')' | ']' | '}' => depth += 1,
            '(' | '[' | '{' if depth > 0 => depth -= 1,
            '(' | '[' | '{' => return receiver[i + c.len_utf8()..].trim(),
            ' ' | ',' | '+' | '-' | '*' | '/' | '%' | '!' | '?' | ':' | '&' | '|' | '='
            | '<' | '>'
                if depth == 0 =>
            {
                return receiver[i + c.len_utf8()..].trim();
            }
            _ => {}
        }
    }
    receiver.trim()
}

fn infer_receiver(receiver: &str) -> Receiver {
    let text = receiver_tail(receiver);
    let quoted = |open: char| text.starts_with(open) && text.ends_with(open) && text.len() >= 2;
    match text {
        "$json" => Receiver::Json,
        "$env" => Receiver::Env,
        "$input" => Receiver::Input,
        "$now" | "$today" => Receiver::Value(ValueKind::Date),
        "true" | "false" => Receiver::Value(ValueKind::Boolean),
        _ if quoted('\'') || quoted('"') || quoted('`') => Receiver::Value(ValueKind::String),
        _ if text.starts_with('[') && text.ends_with(']') => Receiver::Value(ValueKind::Array),
        _ if text.starts_with('{') && text.ends_with('}') => Receiver::Value(ValueKind::Object),
        _ if text.starts_with("$(") && text.ends_with(')') => Receiver::NodeRef,
        _ if text.starts_with("DateTime.") && text.ends_with(')') => {
            Receiver::Value(ValueKind::Date)
        }
        _ if !text.is_empty() && text.parse::<f64>().is_ok() => Receiver::Value(ValueKind::Number),
        _ => Namespace::from_name(text).map_or(Receiver::Unknown, Receiver::Namespace),
    }
}

fn value_properties(kind: ValueKind) -> Vec<CompletionItem> {
    let properties: &[&str] = match kind {
        ValueKind::String | ValueKind::Array => &["length"],
        ValueKind::Date => &[
            "year",
            "month",
            "day",
            "hour",
            "minute",
            "second",
            "millisecond",
            "weekday",
            "weekNumber",
        ],
        _ => &[],
    };
    properties
        .iter()
        .map(|p| CompletionItem::new(*p, CompletionKind::Variable, Some(kind.as_str().into())))
        .collect()
}

fn global_detail(name: &str) -> Option<&'static str> {
    let detail = match name {
        "$json" => "current item data",
        "$node" => "node outputs by name (legacy)",
        "$env" => "environment variables (read-only)",
        "$now" => "current date and time",
        "$today" => "start of the current day",
        "$runIndex" => "index of the current run",
        "$itemIndex" => "index of the current item",
        "$input" => "items flowing into the node",
        "$" => "reference another node's output",
        "Math" | "JSON" | "Object" | "Array" | "Number" | "DateTime" => "namespace",
        "String" | "Boolean" => "conversion",
        "parseInt" | "parseFloat" | "isNaN" | "isFinite" => "number helper",
        _ => return None,
    };
    Some(detail)
}

/// Exact-case prefix matches first, then kind, then label
fn rank(items: &mut Vec<CompletionItem>, prefix: &str) {
    items.sort_by(|a, b| {
        let exact = |item: &CompletionItem| !item.label.starts_with(prefix);
        exact(a)
            .cmp(&exact(b))
            .then(a.kind.cmp(&b.kind))
            .then_with(|| a.label.cmp(&b.label))
    });
    items.dedup_by(|a, b| a.label == b.label && a.kind == b.kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EnvironmentVariables;
    use crate::security::DEFAULT_ALLOWED_GLOBALS;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn provider() -> CompletionProvider {
        CompletionProvider::new(
            ExtensionRegistry::shared(),
            DEFAULT_ALLOWED_GLOBALS.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    #[test]
    fn nothing_outside_expressions() {
        assert_eq!(provider().complete("plain text", 5), vec![]);
        assert_eq!(provider().complete("{{ 1 }} after", 10), vec![]);
    }

    #[test]
    fn globals_filtered_by_prefix() {
        let template = "{{ $js";
        let items = provider().complete(template, template.len());
        assert_eq!(labels(&items), vec!["$json"]);
        assert_eq!(items[0].kind, CompletionKind::Variable);
    }

    #[test]
    fn string_receivers_get_string_methods() {
        let template = "{{ 'abc'.toUp";
        let items = provider().complete(template, template.len());
        assert_eq!(labels(&items), vec!["toUpperCase"]);
        assert_eq!(items[0].insert_text, "toUpperCase()");
    }

    #[test]
    fn date_bindings_get_date_methods() {
        let template = "{{ $now.";
        let items = provider().complete(template, template.len());
        assert!(labels(&items).contains(&"year"));
        assert!(items.iter().all(|item| item.kind != CompletionKind::Keyword));
    }

    #[test]
    fn namespaces_list_their_members() {
        let template = "{{ Math.ma";
        let items = provider().complete(template, template.len());
        assert_eq!(labels(&items), vec!["max"]);
    }

    #[test]
    fn unknown_receivers_get_every_method_once() {
        let template = "{{ $json.items.";
        let items = provider().complete(template, template.len());
        let mut names = labels(&items);
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
        assert!(names.contains(&"map"));
        assert!(names.contains(&"trim"));
    }

    #[test]
    fn exact_case_matches_rank_first() {
        let template = "{{ 'x'.to";
        let items = provider().complete(template, template.len());
        assert!(items.iter().all(|item| item.label.to_lowercase().starts_with("to")));
        let first_inexact = items.iter().position(|item| !item.label.starts_with("to"));
        if let Some(index) = first_inexact {
            assert!(items[index..].iter().all(|item| !item.label.starts_with("to")));
        }
    }

    #[test]
    fn context_keys_for_json_and_env() {
        let ctx = ExpressionContext::builder()
            .json(json!({"name": "Ada", "age": 36}))
            .env([("API_URL", "https://example.test")].into_iter().collect::<EnvironmentVariables>())
            .build();
        let template = "{{ $json.na";
        let items = provider().complete_in_context(template, template.len(), &ctx);
        assert_eq!(labels(&items), vec!["name"]);
        assert_eq!(items[0].detail.as_deref(), Some("string"));

        let template = "{{ $env.";
        let items = provider().complete_in_context(template, template.len(), &ctx);
        assert_eq!(labels(&items), vec!["API_URL"]);
    }

    #[test]
    fn receiver_tail_skips_enclosing_calls() {
        assert_eq!(receiver_tail("$json.items.map(x => x"), "x");
        assert_eq!(receiver_tail("foo('a b')"), "foo('a b')");
        assert_eq!(infer_receiver("1 + 'abc'"), Receiver::Value(ValueKind::String));
        assert_eq!(infer_receiver("$('Webhook')"), Receiver::NodeRef);
    }
}
