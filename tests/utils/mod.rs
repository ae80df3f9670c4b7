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

//! Shared fixtures for integration tests

#![allow(dead_code)]

use flowexpr::context::{
    Connection, ExecutionItem, NodeInfo, RunData, TaskData, WorkflowGraph,
};
use flowexpr::{EngineConfig, ExpressionContext, ExpressionEngine, PairedItemLineage};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Engine with default configuration
pub fn engine() -> ExpressionEngine {
    ExpressionEngine::new(EngineConfig::default()).expect("default configuration is valid")
}

/// Engine with a custom configuration
pub fn engine_with(config: EngineConfig) -> ExpressionEngine {
    ExpressionEngine::new(config).expect("test configuration is valid")
}

/// Context whose current item is `json`
pub fn ctx(json: JsonValue) -> ExpressionContext {
    ExpressionContext::new(json)
}

/// Order item used across tests
pub fn order() -> JsonValue {
    json!({
        "id": "ord-1001",
        "customer": {"name": "Ada Lovelace", "email": "ada@example.com"},
        "lines": [
            {"sku": "A-1", "qty": 2, "price": 9.5},
            {"sku": "B-7", "qty": 1, "price": 20}
        ],
        "createdAt": "2024-03-05T10:15:00Z"
    })
}

/// `Trigger -> Fetch -> Current`, where `Fetch` recorded lineage only when `paired`
pub fn lineage(paired: bool) -> PairedItemLineage {
    let graph = WorkflowGraph::new()
        .with_node(NodeInfo::new("Trigger", "manual"))
        .with_node(NodeInfo::new("Fetch", "http"))
        .with_node(NodeInfo::new("Current", "code"))
        .with_connection(Connection::main("Trigger", "Fetch"))
        .with_connection(Connection::main("Fetch", "Current"));

    let fetched = if paired {
        ExecutionItem::paired(json!({"status": 200}), 0)
    } else {
        ExecutionItem::new(json!({"status": 200}))
    };
    let mut run = RunData::new();
    run.insert(
        "Trigger".into(),
        vec![TaskData::with_items(vec![ExecutionItem::new(
            json!({"user": "ada"}),
        )])],
    );
    run.insert("Fetch".into(), vec![TaskData::with_items(vec![fetched])]);

    PairedItemLineage::new(Arc::new(graph), Arc::new(run), "Current")
}
