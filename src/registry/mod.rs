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

//! Extension method registry
//!
//! A fixed table per value category maps a method name to its implementation
//! and documentation. The same tables drive dispatch in the interpreter and
//! suggestions in the completion provider.
//!
//! Implementations receive the receiver already narrowed to its Rust type and
//! a [`CallSite`] for invoking arrow-function arguments and reserving memory
//! against the evaluation budget.

mod array;
mod boolean;
mod date;
mod number;
mod object;
mod string;

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ExpressionError, Result};
use crate::model::{ObjectMap, Value, ValueKind};

pub use date::format_date;
pub(crate) use number::js_round;

/// Interpreter services available to method implementations
pub trait CallSite {
    /// Invoke an arrow function value with positional arguments
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value>;

    /// Account for `bytes` of new allocation; fails past the memory ceiling
    fn reserve(&mut self, bytes: usize) -> Result<()>;
}

/// String receiver method
pub type StringMethod = fn(&mut dyn CallSite, &str, &[Value]) -> Result<Value>;
/// Number receiver method
pub type NumberMethod = fn(&mut dyn CallSite, f64, &[Value]) -> Result<Value>;
/// Boolean receiver method
pub type BooleanMethod = fn(&mut dyn CallSite, bool, &[Value]) -> Result<Value>;
/// Array receiver method
pub type ArrayMethod = fn(&mut dyn CallSite, &[Value], &[Value]) -> Result<Value>;
/// Object receiver method
pub type ObjectMethod = fn(&mut dyn CallSite, &ObjectMap, &[Value]) -> Result<Value>;
/// Date receiver method
pub type DateMethod = fn(&mut dyn CallSite, DateTime<FixedOffset>, &[Value]) -> Result<Value>;

/// Implementation narrowed to the receiver category
#[derive(Clone, Copy)]
pub enum MethodImpl {
    /// String method
    String(StringMethod),
    /// Number method
    Number(NumberMethod),
    /// Boolean method
    Boolean(BooleanMethod),
    /// Array method
    Array(ArrayMethod),
    /// Object method
    Object(ObjectMethod),
    /// Date method
    Date(DateMethod),
}

impl MethodImpl {
    fn kind(&self) -> ValueKind {
        match self {
            MethodImpl::String(_) => ValueKind::String,
            MethodImpl::Number(_) => ValueKind::Number,
            MethodImpl::Boolean(_) => ValueKind::Boolean,
            MethodImpl::Array(_) => ValueKind::Array,
            MethodImpl::Object(_) => ValueKind::Object,
            MethodImpl::Date(_) => ValueKind::Date,
        }
    }
}

impl std::fmt::Debug for MethodImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodImpl::{}", self.kind())
    }
}

/// Documentation shown in completions and hovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MethodDoc {
    /// Call signature, e.g. `padStart(length, fill?)`
    pub signature: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Usage example
    pub example: &'static str,
}

/// A registered method
#[derive(Debug, Clone, Copy)]
pub struct MethodEntry {
    /// Method name
    pub name: &'static str,
    /// Receiver category
    pub kind: ValueKind,
    /// Implementation
    pub implementation: MethodImpl,
    /// Documentation
    pub doc: MethodDoc,
}

/// Shorthand used by the per-category registration functions
pub(crate) const fn doc(
    signature: &'static str,
    description: &'static str,
    example: &'static str,
) -> MethodDoc {
    MethodDoc {
        signature,
        description,
        example,
    }
}

static SHARED: Lazy<Arc<ExtensionRegistry>> = Lazy::new(|| Arc::new(ExtensionRegistry::new()));

/// Per-category method tables
#[derive(Debug)]
pub struct ExtensionRegistry {
    tables: FxHashMap<ValueKind, IndexMap<&'static str, MethodEntry>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    /// Build the registry with every built-in method
    pub fn new() -> Self {
        let mut registry = Self {
            tables: FxHashMap::default(),
        };
        string::register(&mut registry);
        number::register(&mut registry);
        boolean::register(&mut registry);
        array::register(&mut registry);
        object::register(&mut registry);
        date::register(&mut registry);
        registry
    }

    /// Process-wide immutable instance
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Register a method; later registrations replace earlier ones
    pub fn add(&mut self, name: &'static str, implementation: MethodImpl, doc: MethodDoc) {
        let kind = implementation.kind();
        self.tables.entry(kind).or_default().insert(
            name,
            MethodEntry {
                name,
                kind,
                implementation,
                doc,
            },
        );
    }

    /// Find a method for a receiver category
    pub fn lookup(&self, kind: ValueKind, name: &str) -> Option<&MethodEntry> {
        self.tables.get(&kind).and_then(|table| table.get(name))
    }

    /// Methods of one category in registration order
    pub fn methods_for(&self, kind: ValueKind) -> impl Iterator<Item = &MethodEntry> {
        self.tables.get(&kind).into_iter().flat_map(|t| t.values())
    }

    /// Every method across categories, first registration of each name wins
    pub fn all_methods(&self) -> Vec<&MethodEntry> {
        let mut seen = rustc_hash::FxHashSet::default();
        ValueKind::METHOD_KINDS
            .iter()
            .flat_map(|kind| self.methods_for(*kind))
            .filter(|entry| seen.insert(entry.name))
            .collect()
    }

    /// Whether any category defines `name`
    pub fn is_known_method(&self, name: &str) -> bool {
        self.tables.values().any(|table| table.contains_key(name))
    }

    /// Dispatch `receiver.name(args)`
    pub fn invoke(
        &self,
        site: &mut dyn CallSite,
        receiver: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value> {
        if receiver.is_nullish() {
            return Err(ExpressionError::null_receiver(name));
        }
        let kind = receiver.kind();
        let entry = self
            .lookup(kind, name)
            .ok_or_else(|| ExpressionError::UnknownMethod {
                method: name.to_string(),
                value_type: kind.as_str().to_string(),
            })?;

        match (entry.implementation, receiver) {
            (MethodImpl::String(f), Value::String(s)) => f(site, s, args),
            (MethodImpl::Number(f), Value::Number(n)) => f(site, *n, args),
            (MethodImpl::Boolean(f), Value::Bool(b)) => f(site, *b, args),
            (MethodImpl::Array(f), Value::Array(items)) => f(site, items, args),
            (MethodImpl::Object(f), Value::Object(map)) => f(site, map, args),
            (MethodImpl::Date(f), Value::DateTime(dt)) => f(site, *dt, args),
            _ => Err(ExpressionError::UnknownMethod {
                method: name.to_string(),
                value_type: kind.as_str().to_string(),
            }),
        }
    }
}

static UNDEFINED: Value = Value::Undefined;

/// Positional argument, `undefined` when missing
pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

/// Required string argument
pub(crate) fn str_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ExpressionError::invalid_argument(
            method,
            format!("argument {} must be a string, got {}", index + 1, other.type_tag()),
        )),
        None => Err(ExpressionError::invalid_argument(
            method,
            format!("missing argument {}", index + 1),
        )),
    }
}

/// Optional string argument
pub(crate) fn opt_str_arg<'a>(
    args: &'a [Value],
    index: usize,
    method: &str,
) -> Result<Option<&'a str>> {
    match args.get(index) {
        None | Some(Value::Undefined) => Ok(None),
        Some(_) => str_arg(args, index, method).map(Some),
    }
}

/// Required numeric argument (coerced like JavaScript)
pub(crate) fn num_arg(args: &[Value], index: usize, method: &str) -> Result<f64> {
    match args.get(index) {
        Some(value) if !value.is_nullish() => Ok(value.to_number()),
        _ => Err(ExpressionError::invalid_argument(
            method,
            format!("missing numeric argument {}", index + 1),
        )),
    }
}

/// Optional numeric argument
pub(crate) fn opt_num_arg(args: &[Value], index: usize) -> Option<f64> {
    args.get(index)
        .filter(|v| !v.is_nullish())
        .map(Value::to_number)
}

/// Required arrow-function argument
pub(crate) fn fn_arg<'a>(args: &'a [Value], index: usize, method: &str) -> Result<&'a Value> {
    match args.get(index) {
        Some(value @ Value::Function(_)) => Ok(value),
        _ => Err(ExpressionError::invalid_argument(
            method,
            format!("argument {} must be an arrow function", index + 1),
        )),
    }
}

/// Clamp a JavaScript relative index (`slice`, `at`) into `0..=len`
pub(crate) fn relative_index(index: f64, len: usize) -> usize {
    if index.is_nan() {
        return 0;
    }
    let index = index.trunc();
    if index < 0.0 {
        (len as f64 + index).max(0.0) as usize
    } else {
        index.min(len as f64) as usize
    }
}
