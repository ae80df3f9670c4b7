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

//! Paired-item lineage through expressions and the host JSON context shape

use flowexpr::context::ContextStore;
use flowexpr::{ExpressionContext, ExpressionError, PairedItemError, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

mod utils;
use utils::{engine, lineage};

fn context(paired: bool) -> ExpressionContext {
    ExpressionContext::builder()
        .json(json!({"status": 200}))
        .lineage(lineage(paired))
        .build()
}

#[test]
fn paired_items_resolve_through_intermediate_nodes() {
    let result = engine().evaluate("{{ $('Trigger').item.json.user }}", &context(true));
    assert_eq!(result.value(), Some(&Value::from("ada")));
}

#[test]
fn missing_lineage_names_the_node() {
    let result = engine().evaluate("{{ $('Trigger').item.json.user }}", &context(false));
    assert_eq!(result.type_tag(), "paired_item_no_info");
    assert_eq!(
        result.error(),
        Some(&ExpressionError::PairedItem(PairedItemError::NoInfo {
            node: "Fetch".to_string(),
            item: 0,
        }))
    );

    let body = serde_json::to_value(&result).unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("Fetch"));
}

#[test]
fn nodes_without_a_path_are_distinct_from_missing_data() {
    let engine = engine();
    let ctx = context(true);

    let unknown = engine.evaluate("{{ $('Elsewhere').item }}", &ctx);
    assert_eq!(unknown.type_tag(), "no_node_execution_data");

    let all = engine.evaluate("{{ $('Trigger').all().length }}", &ctx);
    assert_eq!(all.value(), Some(&Value::from(1.0)));
    let executed = engine.evaluate("{{ $('Fetch').isExecuted }}", &ctx);
    assert_eq!(executed.value(), Some(&Value::Bool(true)));
}

#[test]
fn host_json_builds_a_full_context() {
    let data = json!({
        "json": {"status": 200},
        "env": {"REGION": "eu"},
        "runIndex": 0,
        "workflow": {
            "nodes": {
                "Trigger": {"name": "Trigger", "type": "manual"},
                "Current": {"name": "Current", "type": "code"}
            },
            "connections": [{"source": "Trigger", "destination": "Current"}]
        },
        "runData": {
            "Trigger": [{"outputs": [[{"json": {"user": "grace"}}]]}]
        },
        "activeNode": "Current"
    });
    let ctx = ExpressionContext::from_json(data).unwrap();
    let result = engine().evaluate(
        "{{ $('Trigger').item.json.user }}@{{ $env.REGION }}",
        &ctx,
    );
    assert_eq!(result.value(), Some(&Value::from("grace@eu")));
}

#[test]
fn node_scoped_state_needs_a_node() {
    let mut store = ContextStore::new();
    store
        .get_context("node", Some("Fetch"))
        .unwrap()
        .insert("page".into(), json!(2));
    assert_eq!(store.peek("node:Fetch").unwrap()["page"], json!(2));
    assert!(store.get_context("node", None).is_err());
}
