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

//! Execution context for template expressions
//!
//! One [`ExpressionContext`] is built per execution run and handed to the
//! engine by reference. The engine never mutates it; the only writable state
//! of a run lives in its [`ContextStore`].

pub mod lineage;
mod store;

use chrono::{DateTime, FixedOffset, Utc};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::ast::ExpressionAnalysis;
use crate::cache::Fingerprint;
use crate::error::{ExpressionError, PairedItemError, Result};
use crate::model::datetime::{DateUnit, start_of};
use crate::model::{ObjectMap, Value};

pub use lineage::{
    Connection, ExecutionItem, ItemPointer, NodeInfo, PairedItem, PairedItemInfo, RunData,
    TaskData, WorkflowGraph, resolve_paired_item,
};
pub use store::{ContextBag, ContextStore};

/// Read-only view of the host's environment variables
///
/// Expressions can read every variable; the write path always fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariables {
    vars: IndexMap<String, String>,
}

impl EnvironmentVariables {
    /// Wrap a variable map
    pub fn new(vars: IndexMap<String, String>) -> Self {
        Self { vars }
    }

    /// Read a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Attempt a write; always rejected
    pub fn set(&self, name: &str, _value: &Value) -> Result<()> {
        Err(ExpressionError::ReadOnlyVariable {
            name: name.to_string(),
        })
    }

    /// Variable names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Snapshot as an object value
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.vars
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Handle onto the run's lineage data for the item being processed
#[derive(Debug, Clone)]
pub struct PairedItemLineage {
    graph: Arc<WorkflowGraph>,
    run_data: Arc<RunData>,
    node: String,
}

impl PairedItemLineage {
    /// Lineage for items processed by `node`
    pub fn new(graph: Arc<WorkflowGraph>, run_data: Arc<RunData>, node: impl Into<String>) -> Self {
        Self {
            graph,
            run_data,
            node: node.into(),
        }
    }

    /// Node currently executing
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Workflow graph
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Execution data recorded so far
    pub fn run_data(&self) -> &RunData {
        &self.run_data
    }

    /// Item of `target` that input item `item_index` derives from
    pub fn resolve(
        &self,
        target: &str,
        item_index: usize,
        run_index: Option<usize>,
    ) -> std::result::Result<JsonValue, PairedItemError> {
        let start = ItemPointer {
            node: self.node.clone(),
            item_index,
            run_index,
        };
        resolve_paired_item(&self.graph, &self.run_data, &start, target)
    }

    /// Items on output 0 of the latest run of `node`
    pub fn output_items(&self, node: &str) -> Option<Vec<JsonValue>> {
        let task = self.run_data.get(node)?.last()?;
        Some(task.output(0).iter().map(|item| item.json.clone()).collect())
    }
}

/// Data available to the expressions of one execution run
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    json: Value,
    nodes: IndexMap<String, Value>,
    env: EnvironmentVariables,
    input: Vec<Value>,
    run_index: usize,
    item_index: usize,
    now: DateTime<FixedOffset>,
    today: DateTime<FixedOffset>,
    lineage: Option<PairedItemLineage>,
    fingerprint: OnceCell<u64>,
}

impl Default for ExpressionContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExpressionContext {
    /// Context holding only the current item
    pub fn new(json: impl Into<Value>) -> Self {
        Self::builder().json(json).build()
    }

    /// Start building a context
    pub fn builder() -> ExpressionContextBuilder {
        ExpressionContextBuilder::default()
    }

    /// Build from the host's JSON shape `{json, nodes, env, runIndex, itemIndex, ...}`
    pub fn from_json(data: JsonValue) -> std::result::Result<Self, serde_json::Error> {
        let data: ContextData = serde_json::from_value(data)?;
        Ok(data.into_context())
    }

    /// Current item (`$json`)
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Representative output item of a node
    pub fn node_output(&self, name: &str) -> Option<&Value> {
        self.nodes.get(name)
    }

    /// Node name to representative item
    pub fn nodes(&self) -> &IndexMap<String, Value> {
        &self.nodes
    }

    /// Environment variables (`$env`)
    pub fn env(&self) -> &EnvironmentVariables {
        &self.env
    }

    /// Items flowing into the current node (`$input.all()`)
    pub fn input(&self) -> &[Value] {
        &self.input
    }

    /// `$runIndex`
    pub fn run_index(&self) -> usize {
        self.run_index
    }

    /// `$itemIndex`
    pub fn item_index(&self) -> usize {
        self.item_index
    }

    /// `$now`, fixed when the context was built
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// `$today`, start of the day of `$now`
    pub fn today(&self) -> DateTime<FixedOffset> {
        self.today
    }

    /// Lineage handle, when the host supplied graph and run data
    pub fn lineage(&self) -> Option<&PairedItemLineage> {
        self.lineage.as_ref()
    }

    /// Item of `node` the current item derives from
    ///
    /// Without a lineage handle the node's representative item is used.
    pub fn paired_item(&self, node: &str, item_index: Option<usize>) -> Result<Value> {
        let index = item_index.unwrap_or(self.item_index);
        match &self.lineage {
            Some(lineage) => Ok(Value::from(lineage.resolve(
                node,
                index,
                Some(self.run_index),
            )?)),
            None => self.node_output(node).cloned().ok_or_else(|| {
                PairedItemError::NoNodeExecutionData {
                    node: node.to_string(),
                }
                .into()
            }),
        }
    }

    /// Every output item of `node` in this run
    pub fn node_items(&self, node: &str) -> Result<Vec<Value>> {
        if let Some(items) = self.lineage.as_ref().and_then(|l| l.output_items(node)) {
            return Ok(items.iter().map(Value::from).collect());
        }
        match self.node_output(node) {
            Some(item) => Ok(vec![item.clone()]),
            None => Err(PairedItemError::NoNodeExecutionData {
                node: node.to_string(),
            }
            .into()),
        }
    }

    /// `$node` as an object: name to `{json}`
    pub fn node_map(&self) -> Value {
        Value::Object(
            self.nodes
                .iter()
                .map(|(name, item)| (name.clone(), wrap_item(item.clone())))
                .collect(),
        )
    }

    /// Hash of everything an expression could read; computed once
    pub fn full_fingerprint(&self) -> u64 {
        *self.fingerprint.get_or_init(|| {
            let mut fp = Fingerprint::new();
            fp.label("$json").value(&self.json);
            for (name, item) in &self.nodes {
                fp.label(name).value(item);
            }
            fp.label("$env").value(&self.env.to_value());
            fp.label("$input");
            for item in &self.input {
                fp.value(item);
            }
            fp.value(&Value::from(self.run_index))
                .value(&Value::from(self.item_index));
            if let Some(lineage) = &self.lineage {
                fp.label(&lineage.node);
                let recorded = serde_json::to_string(lineage.run_data()).unwrap_or_default();
                fp.label(&recorded);
            }
            fp.finish()
        })
    }

    /// Hash of only the data `analysis` says the expression reads
    ///
    /// Falls back to [`Self::full_fingerprint`] when the hint is incomplete.
    pub fn dependency_fingerprint(&self, analysis: &ExpressionAnalysis) -> u64 {
        if !analysis.dependencies_complete {
            return self.full_fingerprint();
        }
        let mut fp = Fingerprint::new();
        for dependency in &analysis.dependencies {
            fp.label(&dependency.root);
            match (dependency.root.as_str(), dependency.key.as_deref()) {
                ("$json", Some(key)) => {
                    fp.label(key).value(json_field(&self.json, key));
                }
                ("$json", None) => {
                    fp.value(&self.json);
                }
                ("$env", Some(key)) => {
                    fp.label(key);
                    if let Some(value) = self.env.get(key) {
                        fp.label(value);
                    }
                }
                ("$env", None) => {
                    fp.value(&self.env.to_value());
                }
                ("$runIndex", _) => {
                    fp.value(&Value::from(self.run_index));
                }
                ("$itemIndex", _) => {
                    fp.value(&Value::from(self.item_index));
                }
                _ => {}
            }
        }
        fp.finish()
    }
}

/// What a top-level `$json.key` read depends on
///
/// Only object roots can be narrowed to one field. Arrays, strings and dates
/// answer derived names such as `length` or indices, so the whole root counts.
fn json_field<'a>(json: &'a Value, key: &str) -> &'a Value {
    static UNDEFINED: Value = Value::Undefined;
    match json {
        Value::Object(map) => map.get(key).unwrap_or(&UNDEFINED),
        other => other,
    }
}

/// `{json: item}` as returned by `$input.first()` and friends
pub fn wrap_item(json: Value) -> Value {
    let mut map = ObjectMap::with_capacity(1);
    map.insert("json".to_string(), json);
    Value::Object(map)
}

/// Builder for [`ExpressionContext`]
#[derive(Debug, Default)]
pub struct ExpressionContextBuilder {
    json: Value,
    nodes: IndexMap<String, Value>,
    env: EnvironmentVariables,
    input: Option<Vec<Value>>,
    run_index: usize,
    item_index: usize,
    now: Option<DateTime<FixedOffset>>,
    lineage: Option<PairedItemLineage>,
}

impl ExpressionContextBuilder {
    /// Current item
    pub fn json(mut self, json: impl Into<Value>) -> Self {
        self.json = json.into();
        self
    }

    /// Representative output item of a node
    pub fn node(mut self, name: impl Into<String>, item: impl Into<Value>) -> Self {
        self.nodes.insert(name.into(), item.into());
        self
    }

    /// Environment variables
    pub fn env(mut self, env: EnvironmentVariables) -> Self {
        self.env = env;
        self
    }

    /// Items flowing into the current node; defaults to `[json]`
    pub fn input(mut self, items: Vec<Value>) -> Self {
        self.input = Some(items);
        self
    }

    /// Run index
    pub fn run_index(mut self, run_index: usize) -> Self {
        self.run_index = run_index;
        self
    }

    /// Item index
    pub fn item_index(mut self, item_index: usize) -> Self {
        self.item_index = item_index;
        self
    }

    /// Pin `$now` (tests, replays)
    pub fn now(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = Some(now);
        self
    }

    /// Lineage handle
    pub fn lineage(mut self, lineage: PairedItemLineage) -> Self {
        self.lineage = Some(lineage);
        self
    }

    /// Finish the context
    pub fn build(self) -> ExpressionContext {
        let now = self.now.unwrap_or_else(|| Utc::now().fixed_offset());
        let today = start_of(now, DateUnit::Day).unwrap_or(now);
        let input = self.input.unwrap_or_else(|| vec![self.json.clone()]);
        ExpressionContext {
            json: self.json,
            nodes: self.nodes,
            env: self.env,
            input,
            run_index: self.run_index,
            item_index: self.item_index,
            now,
            today,
            lineage: self.lineage,
            fingerprint: OnceCell::new(),
        }
    }
}

/// Host JSON shape accepted by [`ExpressionContext::from_json`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextData {
    /// Current item
    pub json: JsonValue,
    /// Node name to representative item
    pub nodes: IndexMap<String, JsonValue>,
    /// Environment variables
    pub env: IndexMap<String, String>,
    /// Input items; defaults to `[json]`
    pub input: Option<Vec<JsonValue>>,
    /// Run index
    pub run_index: usize,
    /// Item index
    pub item_index: usize,
    /// Workflow graph, enables lineage resolution together with `runData`
    pub workflow: Option<WorkflowGraph>,
    /// Execution data of the run
    pub run_data: Option<RunData>,
    /// Node currently executing
    pub active_node: Option<String>,
}

impl ContextData {
    /// Convert into a context
    pub fn into_context(self) -> ExpressionContext {
        let mut builder = ExpressionContext::builder()
            .json(self.json)
            .env(EnvironmentVariables::new(self.env))
            .run_index(self.run_index)
            .item_index(self.item_index);
        for (name, item) in self.nodes {
            builder = builder.node(name, item);
        }
        if let Some(items) = self.input {
            builder = builder.input(items.into_iter().map(Value::from).collect());
        }
        if let (Some(graph), Some(run_data), Some(node)) =
            (self.workflow, self.run_data, self.active_node)
        {
            builder = builder.lineage(PairedItemLineage::new(
                Arc::new(graph),
                Arc::new(run_data),
                node,
            ));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile_expression;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn analysis(text: &str) -> ExpressionAnalysis {
        compile_expression(text, 0).expect("compiles").analysis
    }

    #[test]
    fn environment_rejects_writes() {
        let env: EnvironmentVariables = [("API_KEY", "secret")].into_iter().collect();
        assert_eq!(env.get("API_KEY"), Some("secret"));
        let err = env.set("API_KEY", &Value::from("other")).unwrap_err();
        assert_eq!(err.kind(), "read_only_error");
        assert_eq!(err.to_string(), "Cannot assign to variables at runtime ('API_KEY')");
        assert_eq!(env.get("API_KEY"), Some("secret"));
    }

    #[test]
    fn from_json_reads_host_shape() {
        let ctx = ExpressionContext::from_json(json!({
            "json": {"value": 1},
            "nodes": {"Webhook": {"body": "x"}},
            "env": {"MODE": "test"},
            "runIndex": 2,
            "itemIndex": 3
        }))
        .unwrap();
        assert_eq!(ctx.json(), &Value::from(json!({"value": 1})));
        assert_eq!(ctx.node_output("Webhook"), Some(&Value::from(json!({"body": "x"}))));
        assert_eq!(ctx.env().get("MODE"), Some("test"));
        assert_eq!((ctx.run_index(), ctx.item_index()), (2, 3));
        assert_eq!(ctx.input().len(), 1);
    }

    #[test]
    fn today_is_start_of_now() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T14:07:09Z").unwrap();
        let ctx = ExpressionContext::builder().now(now).build();
        assert_eq!(ctx.today().to_rfc3339(), "2024-03-05T00:00:00+00:00");
    }

    #[test]
    fn full_fingerprint_tracks_every_root() {
        let a = ExpressionContext::new(json!({"value": "context1"}));
        let b = ExpressionContext::new(json!({"value": "context2"}));
        assert_ne!(a.full_fingerprint(), b.full_fingerprint());
        assert_eq!(a.full_fingerprint(), a.full_fingerprint());
    }

    #[test]
    fn dependency_fingerprint_ignores_unread_keys() {
        let a = ExpressionContext::new(json!({"name": "x", "noise": 1}));
        let b = ExpressionContext::new(json!({"name": "x", "noise": 2}));
        let c = ExpressionContext::new(json!({"name": "y", "noise": 1}));
        let hint = analysis("$json.name.toUpperCase()");
        assert_eq!(a.dependency_fingerprint(&hint), b.dependency_fingerprint(&hint));
        assert_ne!(a.dependency_fingerprint(&hint), c.dependency_fingerprint(&hint));
    }

    #[rstest]
    #[case("$json.length", json!([1, 2]), json!([1, 2, 3]))]
    #[case("$json[0]", json!(["a"]), json!(["b"]))]
    #[case("$json.length", json!("ab"), json!("abcd"))]
    fn non_object_roots_are_hashed_whole(
        #[case] text: &str,
        #[case] before: serde_json::Value,
        #[case] after: serde_json::Value,
    ) {
        let hint = analysis(text);
        let a = ExpressionContext::new(before);
        let b = ExpressionContext::new(after);
        assert_ne!(a.dependency_fingerprint(&hint), b.dependency_fingerprint(&hint));
    }

    #[test]
    fn incomplete_hint_falls_back_to_full() {
        let a = ExpressionContext::new(json!({"noise": 1}));
        let hint = analysis("$('Webhook').item.json.id");
        assert!(!hint.dependencies_complete);
        assert_eq!(a.dependency_fingerprint(&hint), a.full_fingerprint());
    }

    #[test]
    fn paired_item_without_lineage_uses_representative() {
        let ctx = ExpressionContext::builder()
            .node("Webhook", json!({"id": 7}))
            .build();
        assert_eq!(ctx.paired_item("Webhook", None).unwrap(), Value::from(json!({"id": 7})));
        let err = ctx.paired_item("Missing", None).unwrap_err();
        assert_eq!(err.kind(), "no_node_execution_data");
    }

    #[test]
    fn paired_item_follows_lineage() {
        let graph = WorkflowGraph::new()
            .with_node(NodeInfo::new("Webhook", "webhook"))
            .with_node(NodeInfo::new("Code", "code"))
            .with_connection(Connection::main("Webhook", "Code"));
        let mut run = RunData::new();
        run.insert(
            "Webhook".into(),
            vec![TaskData::with_items(vec![
                ExecutionItem::new(json!({"id": 1})),
                ExecutionItem::new(json!({"id": 2})),
            ])],
        );
        let ctx = ExpressionContext::builder()
            .item_index(1)
            .lineage(PairedItemLineage::new(Arc::new(graph), Arc::new(run), "Code"))
            .build();
        assert_eq!(ctx.paired_item("Webhook", None).unwrap(), Value::from(json!({"id": 2})));
        assert_eq!(ctx.node_items("Webhook").unwrap().len(), 2);
    }
}
