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

//! Paired-item lineage
//!
//! The host supplies the workflow graph and the run's execution data. Items
//! point back at the upstream item that produced them (`pairedItem`); lineage
//! resolution walks those records from the current node towards a target
//! node. Records are looked up by `(node, output, item)` index on every step,
//! so no item ever holds a reference to another.

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;

use crate::error::PairedItemError;

/// A node of the host graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    /// Unique node name
    pub name: String,
    /// Node type identifier
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node parameters
    pub parameters: JsonValue,
}

impl NodeInfo {
    /// Create a node with empty parameters
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            parameters: JsonValue::Null,
        }
    }

    /// Look up a parameter by dotted path
    pub fn parameter(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.parameters, |value, key| value.get(key))
    }
}

/// Directed edge `source[output] -> destination[input]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Upstream node
    pub source: String,
    /// Output index on the upstream node
    #[serde(default)]
    pub source_output: usize,
    /// Downstream node
    pub destination: String,
    /// Input index on the downstream node
    #[serde(default)]
    pub destination_input: usize,
}

impl Connection {
    /// Connect output 0 of `source` to input 0 of `destination`
    pub fn main(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_output: 0,
            destination: destination.into(),
            destination_input: 0,
        }
    }
}

/// Nodes and connections of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowGraph {
    /// Nodes by name
    pub nodes: IndexMap<String, NodeInfo>,
    /// Edges
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    /// Add an edge
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Look up a node
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    /// Edge feeding `input` of `node`
    pub fn parent(&self, node: &str, input: usize) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.destination == node && c.destination_input == input)
    }

    /// Every node upstream of `node`
    pub fn ancestors(&self, node: &str) -> FxHashSet<String> {
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([node.to_string()]);
        while let Some(current) = queue.pop_front() {
            for edge in self.connections.iter().filter(|c| c.destination == current) {
                if seen.insert(edge.source.clone()) {
                    queue.push_back(edge.source.clone());
                }
            }
        }
        seen
    }
}

/// Pointer from an item to the upstream item it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairedItem {
    /// Item index in the upstream output
    pub item: usize,
    /// Input of the current node the upstream item arrived on
    #[serde(default)]
    pub input: usize,
}

/// Recorded lineage of one item: an index, a pointer, or several pointers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PairedItemInfo {
    /// Bare item index on input 0
    Index(usize),
    /// Single pointer
    Single(PairedItem),
    /// Several upstream items merged into one
    Many(Vec<PairedItem>),
}

impl PairedItemInfo {
    /// Normalized pointer list
    pub fn entries(&self) -> Vec<PairedItem> {
        match self {
            PairedItemInfo::Index(item) => vec![PairedItem {
                item: *item,
                input: 0,
            }],
            PairedItemInfo::Single(pointer) => vec![*pointer],
            PairedItemInfo::Many(pointers) => pointers.clone(),
        }
    }
}

/// An item produced by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionItem {
    /// Item payload
    pub json: JsonValue,
    /// Lineage record, absent when the node did not record one
    #[serde(default)]
    pub paired_item: Option<PairedItemInfo>,
}

impl ExecutionItem {
    /// Item without lineage
    pub fn new(json: JsonValue) -> Self {
        Self {
            json,
            paired_item: None,
        }
    }

    /// Item paired with upstream item `item` on input 0
    pub fn paired(json: JsonValue, item: usize) -> Self {
        Self {
            json,
            paired_item: Some(PairedItemInfo::Index(item)),
        }
    }
}

/// One execution of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskData {
    /// Items per output index
    pub outputs: Vec<Vec<ExecutionItem>>,
}

impl TaskData {
    /// Task with a single output
    pub fn with_items(items: Vec<ExecutionItem>) -> Self {
        Self {
            outputs: vec![items],
        }
    }

    /// Items of one output
    pub fn output(&self, index: usize) -> &[ExecutionItem] {
        self.outputs.get(index).map_or(&[], Vec::as_slice)
    }
}

/// Execution data of a run: node name to its executions
pub type RunData = IndexMap<String, Vec<TaskData>>;

/// Where lineage resolution starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPointer {
    /// Node currently executing
    pub node: String,
    /// Index of the input item being processed
    pub item_index: usize,
    /// Run of upstream nodes to read; `None` reads each node's latest run
    #[serde(default)]
    pub run_index: Option<usize>,
}

fn task<'a>(run_data: &'a RunData, node: &str, run: Option<usize>) -> Option<&'a TaskData> {
    let runs = run_data.get(node)?;
    match run {
        Some(index) => runs.get(index).or_else(|| runs.last()),
        None => runs.last(),
    }
}

/// Walk lineage from `start` back to the item of `target` it derives from
///
/// Returns the target item's payload. Multiple pointers are all followed;
/// they must agree on one target item.
pub fn resolve_paired_item(
    graph: &WorkflowGraph,
    run_data: &RunData,
    start: &ItemPointer,
    target: &str,
) -> Result<JsonValue, PairedItemError> {
    if run_data.is_empty() {
        return Err(PairedItemError::NoExecutionData);
    }
    if !run_data.contains_key(target) {
        return Err(PairedItemError::NoNodeExecutionData {
            node: target.to_string(),
        });
    }
    if graph.parent(&start.node, 0).is_none() && graph.parent(&start.node, 1).is_none() {
        return Err(PairedItemError::NoInputConnection {
            node: start.node.clone(),
        });
    }
    let ancestors = graph.ancestors(&start.node);
    if !ancestors.contains(target) {
        return Err(PairedItemError::NoConnection {
            node: start.node.clone(),
            target: target.to_string(),
        });
    }

    // Nodes between the target and the start that have not produced data
    let downstream_of_target: FxHashSet<String> = ancestors
        .iter()
        .filter(|n| graph.ancestors(n).contains(target))
        .cloned()
        .collect();
    let mut missing: Vec<String> = downstream_of_target
        .into_iter()
        .filter(|n| !run_data.contains_key(n))
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(PairedItemError::IntermediateNodes { nodes: missing });
    }

    let mut walker = Walker {
        graph,
        run_data,
        run: start.run_index,
        target,
        visited: FxHashSet::default(),
    };
    let found = walker.walk(&start.node, 0, start.item_index)?;
    let mut distinct: Vec<(usize, usize)> = found;
    distinct.sort_unstable();
    distinct.dedup();

    match distinct.as_slice() {
        [(output, item)] => task(run_data, target, start.run_index)
            .and_then(|t| t.output(*output).get(*item))
            .map(|i| i.json.clone())
            .ok_or_else(|| PairedItemError::InvalidInfo {
                node: target.to_string(),
                reason: format!("item {item} does not exist"),
            }),
        [] => Err(PairedItemError::NoConnection {
            node: start.node.clone(),
            target: target.to_string(),
        }),
        _ => Err(PairedItemError::InvalidInfo {
            node: target.to_string(),
            reason: "the item has multiple matching upstream items".to_string(),
        }),
    }
}

struct Walker<'a> {
    graph: &'a WorkflowGraph,
    run_data: &'a RunData,
    run: Option<usize>,
    target: &'a str,
    visited: FxHashSet<(String, usize, usize)>,
}

impl Walker<'_> {
    /// Follow the item arriving on `input` of `node` at position `item`
    ///
    /// Yields `(output, item)` coordinates on the target node.
    fn walk(
        &mut self,
        node: &str,
        input: usize,
        item: usize,
    ) -> Result<Vec<(usize, usize)>, PairedItemError> {
        if !self.visited.insert((node.to_string(), input, item)) {
            return Ok(Vec::new());
        }
        let edge = self
            .graph
            .parent(node, input)
            .ok_or_else(|| PairedItemError::NoInputConnection {
                node: node.to_string(),
            })?;
        let parent = edge.source.as_str();
        if parent == self.target {
            return Ok(vec![(edge.source_output, item)]);
        }
        if !self.graph.ancestors(parent).contains(self.target) {
            return Ok(Vec::new());
        }

        let parent_task = task(self.run_data, parent, self.run).ok_or_else(|| {
            PairedItemError::IntermediateNodes {
                nodes: vec![parent.to_string()],
            }
        })?;
        let record = parent_task
            .output(edge.source_output)
            .get(item)
            .ok_or_else(|| PairedItemError::InvalidInfo {
                node: parent.to_string(),
                reason: format!("output {} has no item {item}", edge.source_output),
            })?;
        let pointers = record
            .paired_item
            .as_ref()
            .ok_or_else(|| PairedItemError::NoInfo {
                node: parent.to_string(),
                item,
            })?
            .entries();

        let mut found = Vec::new();
        for pointer in pointers {
            found.extend(self.walk(parent, pointer.input, pointer.item)?);
        }
        Ok(found)
    }
}
