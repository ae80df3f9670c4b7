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

//! Host proxies exposed to expressions as globals

use std::fmt;

use super::value::ValueKind;

/// Global namespace objects (`Math.max(...)`, `JSON.stringify(...)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `Math`
    Math,
    /// `JSON`
    Json,
    /// `Object`
    Object,
    /// `Array`
    Array,
    /// `Number`
    Number,
    /// `DateTime`
    DateTime,
}

impl Namespace {
    /// Global name
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Math => "Math",
            Namespace::Json => "JSON",
            Namespace::Object => "Object",
            Namespace::Array => "Array",
            Namespace::Number => "Number",
            Namespace::DateTime => "DateTime",
        }
    }

    /// Every namespace, in global-list order
    pub const ALL: [Namespace; 6] = [
        Namespace::Math,
        Namespace::Json,
        Namespace::Object,
        Namespace::Array,
        Namespace::Number,
        Namespace::DateTime,
    ];

    /// Namespace bound to a global name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.name() == name)
    }

    /// Callable members
    pub fn functions(&self) -> &'static [&'static str] {
        match self {
            Namespace::Math => &[
                "abs", "ceil", "floor", "round", "trunc", "sign", "sqrt", "cbrt", "exp", "log",
                "log10", "log2", "sin", "cos", "tan", "pow", "hypot", "min", "max",
            ],
            Namespace::Json => &["stringify", "parse"],
            Namespace::Object => &["keys", "values", "entries", "assign", "fromEntries"],
            Namespace::Array => &["isArray", "from", "of"],
            Namespace::Number => &[
                "isInteger",
                "isSafeInteger",
                "isFinite",
                "isNaN",
                "parseFloat",
                "parseInt",
            ],
            Namespace::DateTime => &[
                "now",
                "local",
                "fromISO",
                "fromHTTP",
                "fromRFC2822",
                "fromSQL",
                "fromMillis",
                "fromSeconds",
                "isDateTime",
            ],
        }
    }

    /// Constant members
    pub fn constants(&self) -> &'static [&'static str] {
        match self {
            Namespace::Math => &["PI", "E", "LN2", "LN10", "SQRT2"],
            Namespace::Number => &[
                "MAX_SAFE_INTEGER",
                "MIN_SAFE_INTEGER",
                "EPSILON",
                "MAX_VALUE",
                "MIN_VALUE",
                "POSITIVE_INFINITY",
                "NEGATIVE_INFINITY",
                "NaN",
            ],
            _ => &[],
        }
    }
}

/// Methods of `$("Node")` references
pub const NODE_REF_METHODS: &[&str] = &["first", "last", "all", "itemMatching", "pairedItem"];

/// Properties of `$("Node")` references
pub const NODE_REF_PROPERTIES: &[&str] = &["item", "json", "isExecuted"];

/// Methods of `$input`
pub const INPUT_METHODS: &[&str] = &["first", "last", "all"];

/// Whether `name` is a member function of any host proxy
pub fn is_host_method(name: &str) -> bool {
    NODE_REF_METHODS.contains(&name)
        || Namespace::ALL
            .iter()
            .any(|ns| ns.functions().contains(&name))
}

/// Free functions callable by name (`parseInt(x)`, `$("Node")`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `parseInt`
    ParseInt,
    /// `parseFloat`
    ParseFloat,
    /// `isNaN`
    IsNaN,
    /// `isFinite`
    IsFinite,
    /// `String(x)`
    String,
    /// `Boolean(x)`
    Boolean,
    /// `$("Node name")`
    NodeSelector,
}

impl Builtin {
    /// Global name
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
            Builtin::IsNaN => "isNaN",
            Builtin::IsFinite => "isFinite",
            Builtin::String => "String",
            Builtin::Boolean => "Boolean",
            Builtin::NodeSelector => "$",
        }
    }
}

/// Proxy values that stand in for host objects
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// A namespace global
    Namespace(Namespace),
    /// A callable global
    Builtin(Builtin),
    /// Result of `$("Node")`, resolved lazily
    NodeRef(String),
    /// `$input`, the items flowing into the current node
    Input,
}

impl HostValue {
    /// Type tag reported for the proxy
    pub fn kind(&self) -> ValueKind {
        match self {
            HostValue::Builtin(_) => ValueKind::Function,
            _ => ValueKind::Object,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Namespace(ns) => write!(f, "[object {}]", ns.name()),
            HostValue::Builtin(builtin) => write!(f, "[Function: {}]", builtin.name()),
            HostValue::NodeRef(node) => write!(f, "[Node: {node}]"),
            HostValue::Input => write!(f, "[Input]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_resolve_by_name() {
        assert_eq!(Namespace::from_name("JSON"), Some(Namespace::Json));
        assert_eq!(Namespace::from_name("Reflect"), None);
        assert!(Namespace::Math.functions().contains(&"max"));
        assert!(Namespace::Number.constants().contains(&"EPSILON"));
    }

    #[test]
    fn host_methods_cover_node_references() {
        assert!(is_host_method("itemMatching"));
        assert!(is_host_method("fromEntries"));
        assert!(!is_host_method("toUpperCase"));
    }
}
