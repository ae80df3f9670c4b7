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

//! Per-run key/value store for flow- and node-scoped state

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ContextError;

/// Key/value bag of one scope
pub type ContextBag = IndexMap<String, JsonValue>;

/// Scoped state owned by a single execution run
///
/// Bags are created on first access under the key `flow` or `node:<name>`.
/// The store is passed by `&mut` to whoever needs it; nothing is global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextStore {
    bags: IndexMap<String, ContextBag>,
}

impl ContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Bag for `scope`, created when missing
    ///
    /// `scope` is `"flow"`, `"node"` together with `node`, or the stored key
    /// form `"node:<name>"`, which names the node itself.
    pub fn get_context(
        &mut self,
        scope: &str,
        node: Option<&str>,
    ) -> Result<&mut ContextBag, ContextError> {
        let key = match (scope, node) {
            ("flow", _) => "flow".to_string(),
            ("node", Some(name)) => format!("node:{name}"),
            ("node" | "node:", None) => return Err(ContextError::MissingNode),
            (prefixed, _) if prefixed.starts_with("node:") && prefixed.len() > "node:".len() => {
                prefixed.to_string()
            }
            (other, _) => return Err(ContextError::UnknownScope(other.to_string())),
        };
        Ok(self.bags.entry(key).or_default())
    }

    /// Read-only view of a bag, if it was ever created
    pub fn peek(&self, key: &str) -> Option<&ContextBag> {
        self.bags.get(key)
    }

    /// Keys of the created bags
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.bags.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bags_are_created_on_first_access() {
        let mut store = ContextStore::new();
        store
            .get_context("flow", None)
            .unwrap()
            .insert("count".into(), json!(1));
        store
            .get_context("node", Some("HTTP Request"))
            .unwrap()
            .insert("cursor".into(), json!("abc"));

        assert_eq!(store.get_context("flow", None).unwrap()["count"], json!(1));
        assert_eq!(
            store.scopes().collect::<Vec<_>>(),
            vec!["flow", "node:HTTP Request"]
        );
        assert_eq!(store.peek("node:Other"), None);
    }

    #[test]
    fn node_scope_requires_a_node() {
        let mut store = ContextStore::new();
        assert_eq!(store.get_context("node", None).unwrap_err(), ContextError::MissingNode);
        assert_eq!(
            store.get_context("global", None).unwrap_err(),
            ContextError::UnknownScope("global".into())
        );
    }

    #[test]
    fn prefixed_node_scope_reaches_the_same_bag() {
        let mut store = ContextStore::new();
        store
            .get_context("node", Some("Webhook"))
            .unwrap()
            .insert("cursor".into(), json!(5));
        assert_eq!(
            store.get_context("node:Webhook", None).unwrap()["cursor"],
            json!(5)
        );
        assert_eq!(store.scopes().collect::<Vec<_>>(), vec!["node:Webhook"]);
        assert_eq!(store.get_context("node:", None).unwrap_err(), ContextError::MissingNode);
    }

    #[test]
    fn runs_do_not_share_state() {
        let mut first = ContextStore::new();
        let mut second = ContextStore::new();
        first
            .get_context("flow", None)
            .unwrap()
            .insert("seen".into(), json!(true));
        assert!(second.get_context("flow", None).unwrap().is_empty());
    }
}
