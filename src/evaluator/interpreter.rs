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

//! Tree-walking interpreter with enforced budgets
//!
//! Every node evaluation is a step. Steps are checked against the wall-clock
//! deadline and the cancellation token, so a runaway callback chain stops
//! within a few steps of the deadline. Call frames (calls and lambda
//! invocations) count against the call-stack ceiling; node nesting has its
//! own fixed cap so deep operator chains cannot exhaust the native stack.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;

use super::engine::CancellationToken;
use crate::ast::{BinaryOperator, Expression, Literal, Node, UnaryOperator};
use crate::context::{ExpressionContext, wrap_item};
use crate::error::{ExpressionError, PairedItemError, ResourceKind, Result};
use crate::model::datetime::{DateInput, DateUnit, component, normalize_date_time};
use crate::model::{Builtin, HostValue, Lambda, Namespace, ObjectMap, Value, format_number};
use crate::registry::{CallSite, ExtensionRegistry};
use crate::security::SecurityPolicy;

/// Node nesting cap, independent of the configured call-stack ceiling
const MAX_NESTING: usize = 256;

/// Deadline and cancellation are polled every this many steps
const CHECK_INTERVAL: u64 = 16;

const SLOT: usize = 16;

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)")
        .expect("static pattern")
});

/// Per-template evaluation limits
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    pub deadline: Instant,
    pub timeout_ms: u64,
    pub max_frames: usize,
    pub max_memory: u64,
}

impl Budget {
    pub(crate) fn from_policy(policy: &SecurityPolicy, start: Instant) -> Self {
        Self {
            deadline: start + policy.timeout(),
            timeout_ms: policy.config().timeout_ms,
            max_frames: policy.max_call_stack_size(),
            max_memory: policy.max_memory(),
        }
    }
}

/// Feature switches resolved from the engine configuration
#[derive(Debug, Clone, Copy)]
pub(crate) struct Libraries {
    pub date_time: bool,
}

pub(crate) struct Interpreter<'a> {
    ctx: &'a ExpressionContext,
    policy: &'a SecurityPolicy,
    registry: &'a ExtensionRegistry,
    cancel: Option<&'a CancellationToken>,
    libraries: Libraries,
    budget: Budget,
    steps: u64,
    frames: usize,
    nesting: usize,
    memory: u64,
    locals: Vec<(String, Value)>,
    error_span: Option<(usize, usize)>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        ctx: &'a ExpressionContext,
        policy: &'a SecurityPolicy,
        registry: &'a ExtensionRegistry,
        libraries: Libraries,
        budget: Budget,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self {
            ctx,
            policy,
            registry,
            cancel,
            libraries,
            budget,
            steps: 0,
            frames: 0,
            nesting: 0,
            memory: 0,
            locals: Vec::new(),
            error_span: None,
        }
    }

    /// Steps spent so far
    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    /// Span of the innermost node that failed, relative to the expression text
    pub(crate) fn take_error_span(&mut self) -> Option<(usize, usize)> {
        self.error_span.take()
    }

    /// Fail when past the deadline or cancelled
    pub(crate) fn check_interrupts(&self) -> Result<()> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ExpressionError::Cancelled);
        }
        if Instant::now() >= self.budget.deadline {
            return Err(ExpressionError::Timeout {
                timeout_ms: self.budget.timeout_ms,
            });
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps % CHECK_INTERVAL == 0 {
            self.check_interrupts()?;
        }
        Ok(())
    }

    fn enter_frame(&mut self) -> Result<()> {
        if self.frames >= self.budget.max_frames {
            return Err(ExpressionError::ResourceLimit {
                kind: ResourceKind::CallStack,
                limit: self.budget.max_frames as u64,
            });
        }
        self.frames += 1;
        Ok(())
    }

    /// Evaluate a node
    pub(crate) fn eval(&mut self, node: &Node) -> Result<Value> {
        self.tick()?;
        if self.nesting >= MAX_NESTING {
            return Err(ExpressionError::ResourceLimit {
                kind: ResourceKind::CallStack,
                limit: MAX_NESTING as u64,
            });
        }
        self.nesting += 1;
        let result = self.eval_node(node);
        self.nesting -= 1;
        if result.is_err() && self.error_span.is_none() {
            self.error_span = Some((node.start, node.end));
        }
        result
    }

    fn eval_node(&mut self, node: &Node) -> Result<Value> {
        match &node.value {
            Expression::Literal(literal) => Ok(literal_value(literal)),
            Expression::Identifier(name) => self.resolve_identifier(name),
            Expression::Array(items) => {
                self.reserve(SLOT * items.len())?;
                items.iter().map(|item| self.eval(item)).collect::<Result<Vec<_>>>().map(Value::Array)
            }
            Expression::Object(entries) => {
                let mut map = ObjectMap::with_capacity(entries.len());
                for (key, value) in entries {
                    self.reserve(SLOT + key.len())?;
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expression::Member {
                object,
                property,
                optional,
            } => self.eval_member(object, property, *optional),
            Expression::Index {
                object,
                index,
                optional,
            } => self.eval_index(object, index, *optional),
            Expression::Call {
                callee,
                arguments,
                optional,
            } => {
                self.enter_frame()?;
                let result = self.eval_call(callee, arguments, *optional);
                self.frames -= 1;
                result
            }
            Expression::Unary { operator, operand } => {
                let value = self.eval(operand)?;
                Ok(unary(*operator, &value))
            }
            Expression::Binary {
                operator,
                left,
                right,
            } => self.eval_binary(*operator, left, right),
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expression::Lambda { params, body } => Ok(Value::Function(Arc::new(Lambda {
                params: params.clone(),
                body: Arc::clone(body),
                captured: self.locals.clone(),
            }))),
            Expression::Assign { target, .. } => Err(self.assignment_error(target)),
        }
    }

    fn assignment_error(&self, target: &Node) -> ExpressionError {
        let env_key = match &target.value {
            Expression::Member {
                object, property, ..
            } if is_root(object, "$env") => Some(property.clone()),
            Expression::Index { object, index, .. } if is_root(object, "$env") => {
                Some(literal_key(index).unwrap_or_else(|| "$env".to_string()))
            }
            _ => None,
        };
        match env_key {
            Some(key) if !self.is_local("$env") => match self.ctx.env().set(&key, &Value::Undefined) {
                Err(err) => err,
                Ok(()) => unsupported("assignments are not supported in expressions"),
            },
            _ => unsupported("assignments are not supported in expressions"),
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|(local, _)| local == name)
    }

    fn resolve_identifier(&mut self, name: &str) -> Result<Value> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            return Ok(value.clone());
        }
        if !self.policy.is_allowed_global(name) {
            return Err(not_defined(name));
        }
        let date_time = self.libraries.date_time;
        let value = match name {
            "$json" => self.ctx.json().clone(),
            "$node" => self.ctx.node_map(),
            "$env" => self.ctx.env().to_value(),
            "$now" if date_time => Value::DateTime(self.ctx.now()),
            "$today" if date_time => Value::DateTime(self.ctx.today()),
            "$runIndex" => Value::from(self.ctx.run_index()),
            "$itemIndex" => Value::from(self.ctx.item_index()),
            "$input" => Value::Host(HostValue::Input),
            "$" => Value::Host(HostValue::Builtin(Builtin::NodeSelector)),
            "Math" => Value::Host(HostValue::Namespace(Namespace::Math)),
            "JSON" => Value::Host(HostValue::Namespace(Namespace::Json)),
            "Object" => Value::Host(HostValue::Namespace(Namespace::Object)),
            "Array" => Value::Host(HostValue::Namespace(Namespace::Array)),
            "Number" => Value::Host(HostValue::Namespace(Namespace::Number)),
            "DateTime" if date_time => Value::Host(HostValue::Namespace(Namespace::DateTime)),
            "String" => Value::Host(HostValue::Builtin(Builtin::String)),
            "Boolean" => Value::Host(HostValue::Builtin(Builtin::Boolean)),
            "parseInt" => Value::Host(HostValue::Builtin(Builtin::ParseInt)),
            "parseFloat" => Value::Host(HostValue::Builtin(Builtin::ParseFloat)),
            "isNaN" => Value::Host(HostValue::Builtin(Builtin::IsNaN)),
            "isFinite" => Value::Host(HostValue::Builtin(Builtin::IsFinite)),
            _ => return Err(not_defined(name)),
        };
        Ok(value)
    }

    /// `$json.key` and `$env.KEY` without materializing the whole root
    fn root_property(&self, object: &Node, key: &str) -> Option<Value> {
        if is_root(object, "$json")
            && !self.is_local("$json")
            && self.policy.is_allowed_global("$json")
        {
            return Some(property(self.ctx.json(), key));
        }
        if is_root(object, "$env") && !self.is_local("$env") && self.policy.is_allowed_global("$env")
        {
            return Some(
                self.ctx
                    .env()
                    .get(key)
                    .map_or(Value::Undefined, Value::from),
            );
        }
        None
    }

    fn eval_member(&mut self, object: &Node, name: &str, optional: bool) -> Result<Value> {
        if let Some(value) = self.root_property(object, name) {
            return Ok(value);
        }
        let receiver = self.eval(object)?;
        self.read_property(&receiver, name, optional)
    }

    fn eval_index(&mut self, object: &Node, index: &Node, optional: bool) -> Result<Value> {
        let literal = literal_key(index);
        if self.policy.strict_grammar() && literal.is_none() {
            return Err(ExpressionError::SecurityViolation {
                rule: "computed_member_access".to_string(),
            });
        }
        if let Some(value) = literal
            .as_deref()
            .and_then(|key| self.root_property(object, key))
        {
            return Ok(value);
        }
        let receiver = self.eval(object)?;
        if receiver.is_nullish() && optional {
            return Ok(Value::Undefined);
        }
        let key = self.eval(index)?;
        match (&receiver, &key) {
            (Value::Array(items), Value::Number(n)) => Ok(element(items, *n)),
            (Value::String(s), Value::Number(n)) => Ok(char_at(s, *n)),
            _ => self.read_property(&receiver, &key.to_js_string(), optional),
        }
    }

    fn read_property(&mut self, receiver: &Value, name: &str, optional: bool) -> Result<Value> {
        match receiver {
            Value::Undefined | Value::Null if optional => Ok(Value::Undefined),
            Value::Undefined | Value::Null => Err(ExpressionError::NullPropertyAccess {
                property: name.to_string(),
                receiver: receiver.type_tag().to_string(),
            }),
            Value::DateTime(dt) => Ok(date_property(dt, name)),
            Value::Host(host) => self.host_property(host, name),
            other => Ok(property(other, name)),
        }
    }

    fn host_property(&mut self, host: &HostValue, name: &str) -> Result<Value> {
        match host {
            HostValue::NodeRef(node) => match name {
                "item" => Ok(wrap_item(self.ctx.paired_item(node, None)?)),
                "json" => self.ctx.node_output(node).cloned().ok_or_else(|| {
                    ExpressionError::from(PairedItemError::NoNodeExecutionData {
                        node: node.clone(),
                    })
                }),
                "isExecuted" => Ok(Value::Bool(self.ctx.node_items(node).is_ok())),
                _ => Ok(Value::Undefined),
            },
            HostValue::Input => match name {
                "item" => Ok(wrap_item(self.current_input())),
                _ => Ok(Value::Undefined),
            },
            HostValue::Namespace(namespace) => Ok(namespace_constant(*namespace, name)),
            HostValue::Builtin(builtin) => match name {
                "name" => Ok(Value::from(builtin.name())),
                _ => Ok(Value::Undefined),
            },
        }
    }

    fn current_input(&self) -> Value {
        self.ctx
            .input()
            .get(self.ctx.item_index())
            .cloned()
            .unwrap_or_else(|| self.ctx.json().clone())
    }

    /// Argument values; most calls take few, so they stay on the stack
    fn eval_args(&mut self, arguments: &[Node]) -> Result<SmallVec<[Value; 4]>> {
        arguments.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_call(&mut self, callee: &Node, arguments: &[Node], optional: bool) -> Result<Value> {
        if let Expression::Member {
            object,
            property,
            optional: member_optional,
        } = &callee.value
        {
            let receiver = self.eval(object)?;
            if receiver.is_nullish() && (*member_optional || optional) {
                return Ok(Value::Undefined);
            }
            let args = self.eval_args(arguments)?;
            return self.call_method(&receiver, property, &args);
        }

        let function = self.eval(callee)?;
        if function.is_nullish() && optional {
            return Ok(Value::Undefined);
        }
        let args = self.eval_args(arguments)?;
        self.call_value(&function, &args, Some(callee))
    }

    fn call_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
        if let Value::Host(host) = receiver {
            return self.call_host_method(host, name, args);
        }
        if !self.policy.is_allowed_method(name) {
            return Err(ExpressionError::SecurityViolation {
                rule: format!("method_not_allowed:{name}"),
            });
        }
        let registry = self.registry;
        registry.invoke(self, receiver, name, args)
    }

    fn call_value(&mut self, function: &Value, args: &[Value], callee: Option<&Node>) -> Result<Value> {
        match function {
            Value::Function(lambda) => self.invoke_lambda(lambda, args),
            Value::Host(HostValue::Builtin(builtin)) => self.call_builtin(*builtin, args),
            Value::Host(HostValue::Namespace(Namespace::Number)) => {
                Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
            }
            other => Err(ExpressionError::NotCallable {
                name: callee
                    .map(describe_callee)
                    .unwrap_or_else(|| other.type_tag().to_string()),
            }),
        }
    }

    fn invoke_lambda(&mut self, lambda: &Lambda, args: &[Value]) -> Result<Value> {
        self.check_interrupts()?;
        self.enter_frame()?;
        let mut scope = lambda.captured.clone();
        for (i, param) in lambda.params.iter().enumerate() {
            scope.push((param.clone(), args.get(i).cloned().unwrap_or_default()));
        }
        let saved = std::mem::replace(&mut self.locals, scope);
        let result = self.eval(&lambda.body);
        self.locals = saved;
        self.frames -= 1;
        result
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        match builtin {
            Builtin::ParseInt => Ok(Value::Number(parse_int(
                &first.to_js_string(),
                args.get(1).filter(|v| !v.is_nullish()).map(Value::to_number),
            ))),
            Builtin::ParseFloat => Ok(Value::Number(parse_float(&first.to_js_string()))),
            Builtin::IsNaN => Ok(Value::Bool(first.to_number().is_nan())),
            Builtin::IsFinite => Ok(Value::Bool(first.to_number().is_finite())),
            Builtin::String => Ok(Value::String(if args.is_empty() {
                String::new()
            } else {
                first.to_js_string()
            })),
            Builtin::Boolean => Ok(Value::Bool(first.is_truthy())),
            Builtin::NodeSelector => match first {
                Value::String(node) => Ok(Value::Host(HostValue::NodeRef(node))),
                other => Err(ExpressionError::invalid_argument(
                    "$",
                    format!("expected a node name, got {}", other.type_tag()),
                )),
            },
        }
    }

    fn call_host_method(&mut self, host: &HostValue, name: &str, args: &[Value]) -> Result<Value> {
        match host {
            HostValue::Namespace(namespace) => self.call_namespace(*namespace, name, args),
            HostValue::NodeRef(node) => {
                let node = node.clone();
                match name {
                    "first" => Ok(self.ctx.node_items(&node)?.into_iter().next().map_or(Value::Undefined, wrap_item)),
                    "last" => Ok(self.ctx.node_items(&node)?.pop().map_or(Value::Undefined, wrap_item)),
                    "all" => {
                        let items = self.ctx.node_items(&node)?;
                        self.reserve(SLOT * items.len())?;
                        Ok(Value::Array(items.into_iter().map(wrap_item).collect()))
                    }
                    "pairedItem" => Ok(wrap_item(self.ctx.paired_item(&node, None)?)),
                    "itemMatching" => {
                        let index = args.first().map_or(f64::NAN, Value::to_number);
                        if !(index >= 0.0 && index.fract() == 0.0) {
                            return Err(ExpressionError::invalid_argument(
                                "itemMatching",
                                "expected a non-negative item index",
                            ));
                        }
                        Ok(wrap_item(self.ctx.paired_item(&node, Some(index as usize))?))
                    }
                    _ => Err(unknown_method(name, "object")),
                }
            }
            HostValue::Input => {
                let ctx = self.ctx;
                let items = ctx.input();
                match name {
                    "first" => Ok(items.first().cloned().map_or(Value::Undefined, wrap_item)),
                    "last" => Ok(items.last().cloned().map_or(Value::Undefined, wrap_item)),
                    "all" => {
                        self.reserve(SLOT * items.len())?;
                        Ok(Value::Array(items.iter().cloned().map(wrap_item).collect()))
                    }
                    _ => Err(unknown_method(name, "object")),
                }
            }
            HostValue::Builtin(_) => Err(unknown_method(name, "function")),
        }
    }

    fn call_namespace(&mut self, namespace: Namespace, name: &str, args: &[Value]) -> Result<Value> {
        match namespace {
            Namespace::Math => math(name, args),
            Namespace::Json => self.json_function(name, args),
            Namespace::Object => self.object_function(name, args),
            Namespace::Array => self.array_function(name, args),
            Namespace::Number => number_function(name, args),
            Namespace::DateTime => self.date_time_function(name, args),
        }
    }

    fn json_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        match name {
            "stringify" => {
                if matches!(first, Value::Undefined | Value::Function(_)) {
                    return Ok(Value::Undefined);
                }
                let json = first.to_json();
                let indent = args.get(2).map_or(0.0, Value::to_number);
                let text = if indent >= 1.0 {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                }
                .map_err(|e| ExpressionError::invalid_argument("JSON.stringify", e.to_string()))?;
                self.reserve(text.len())?;
                Ok(Value::String(text))
            }
            "parse" => {
                let text = first.to_js_string();
                self.reserve(text.len())?;
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(Value::from)
                    .map_err(|e| ExpressionError::invalid_argument("JSON.parse", e.to_string()))
            }
            _ => Err(unknown_method(name, "object")),
        }
    }

    fn object_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        if matches!(name, "keys" | "values" | "entries") {
            let pairs: Vec<(String, Value)> = match first {
                Value::Object(map) => map.into_iter().collect(),
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
                Value::Undefined | Value::Null => {
                    return Err(ExpressionError::invalid_argument(
                        format!("Object.{name}"),
                        "cannot convert undefined or null to object",
                    ));
                }
                _ => Vec::new(),
            };
            self.reserve(SLOT * pairs.len())?;
            let out = pairs
                .into_iter()
                .map(|(k, v)| match name {
                    "keys" => Value::String(k),
                    "values" => v,
                    _ => Value::Array(vec![Value::String(k), v]),
                })
                .collect();
            return Ok(Value::Array(out));
        }
        match name {
            "assign" => {
                let mut out = ObjectMap::new();
                for source in args {
                    if let Value::Object(map) = source {
                        self.reserve(SLOT * map.len())?;
                        out.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
                Ok(Value::Object(out))
            }
            "fromEntries" => {
                let Value::Array(entries) = first else {
                    return Err(ExpressionError::invalid_argument(
                        "Object.fromEntries",
                        "expected an array of [key, value] pairs",
                    ));
                };
                self.reserve(SLOT * entries.len())?;
                let mut out = ObjectMap::with_capacity(entries.len());
                for entry in entries {
                    if let Value::Array(pair) = entry {
                        let key = pair.first().map(Value::to_js_string).unwrap_or_default();
                        out.insert(key, pair.get(1).cloned().unwrap_or_default());
                    }
                }
                Ok(Value::Object(out))
            }
            _ => Err(unknown_method(name, "object")),
        }
    }

    fn array_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        match name {
            "isArray" => Ok(Value::Bool(matches!(first, Value::Array(_)))),
            "of" => {
                self.reserve(SLOT * args.len())?;
                Ok(Value::Array(args.to_vec()))
            }
            "from" => {
                let items = match first {
                    Value::Array(items) => items,
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    Value::Object(map) => match map.get("length").map(Value::to_number) {
                        Some(n) if n >= 0.0 && n.is_finite() => {
                            // Charged before allocating; `as` saturates huge lengths
                            let len = n as usize;
                            self.reserve(SLOT.saturating_mul(len))?;
                            return self.array_from(vec![Value::Undefined; len], args.get(1));
                        }
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                self.reserve(SLOT.saturating_mul(items.len()))?;
                self.array_from(items, args.get(1))
            }
            _ => Err(unknown_method(name, "object")),
        }
    }

    fn array_from(&mut self, items: Vec<Value>, mapper: Option<&Value>) -> Result<Value> {
        match mapper {
            Some(f @ Value::Function(_)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.call(f, &[item, Value::from(i)]))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            _ => Ok(Value::Array(items)),
        }
    }

    fn date_time_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        let date = match name {
            "now" | "local" => self.ctx.now(),
            "fromISO" | "fromHTTP" | "fromRFC2822" | "fromSQL" => {
                normalize_date_time(DateInput::Text(&first.to_js_string()))?
            }
            "fromMillis" => normalize_date_time(DateInput::Millis(first.to_number()))?,
            "fromSeconds" => normalize_date_time(DateInput::Millis(first.to_number() * 1000.0))?,
            "isDateTime" => return Ok(Value::Bool(matches!(first, Value::DateTime(_)))),
            _ => return Err(unknown_method(name, "object")),
        };
        Ok(Value::DateTime(date))
    }

    fn eval_binary(&mut self, operator: BinaryOperator, left: &Node, right: &Node) -> Result<Value> {
        let lhs = self.eval(left)?;
        match operator {
            BinaryOperator::And => {
                return if lhs.is_truthy() { self.eval(right) } else { Ok(lhs) };
            }
            BinaryOperator::Or => {
                return if lhs.is_truthy() { Ok(lhs) } else { self.eval(right) };
            }
            BinaryOperator::Nullish => {
                return if lhs.is_nullish() { self.eval(right) } else { Ok(lhs) };
            }
            _ => {}
        }
        let rhs = self.eval(right)?;
        let value = match operator {
            BinaryOperator::Add => {
                if concatenates(&lhs) || concatenates(&rhs) {
                    let left_text = lhs.to_js_string();
                    let right_text = rhs.to_js_string();
                    self.reserve(left_text.len() + right_text.len())?;
                    Value::String(left_text + &right_text)
                } else {
                    Value::Number(lhs.to_number() + rhs.to_number())
                }
            }
            BinaryOperator::Subtract => Value::Number(lhs.to_number() - rhs.to_number()),
            BinaryOperator::Multiply => Value::Number(lhs.to_number() * rhs.to_number()),
            BinaryOperator::Divide => Value::Number(lhs.to_number() / rhs.to_number()),
            BinaryOperator::Modulo => Value::Number(lhs.to_number() % rhs.to_number()),
            BinaryOperator::Power => Value::Number(power(lhs.to_number(), rhs.to_number())),
            BinaryOperator::Equal => Value::Bool(lhs.loose_equals(&rhs)),
            BinaryOperator::NotEqual => Value::Bool(!lhs.loose_equals(&rhs)),
            BinaryOperator::StrictEqual => Value::Bool(lhs.strict_equals(&rhs)),
            BinaryOperator::StrictNotEqual => Value::Bool(!lhs.strict_equals(&rhs)),
            BinaryOperator::LessThan => Value::Bool(compare(&lhs, &rhs, |o| o.is_lt())),
            BinaryOperator::LessThanOrEqual => Value::Bool(compare(&lhs, &rhs, |o| o.is_le())),
            BinaryOperator::GreaterThan => Value::Bool(compare(&lhs, &rhs, |o| o.is_gt())),
            BinaryOperator::GreaterThanOrEqual => Value::Bool(compare(&lhs, &rhs, |o| o.is_ge())),
            BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Nullish => {
                unreachable!("short-circuit operators return early")
            }
        };
        Ok(value)
    }
}

impl CallSite for Interpreter<'_> {
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value> {
        self.call_value(function, args, None)
    }

    fn reserve(&mut self, bytes: usize) -> Result<()> {
        self.memory = self.memory.saturating_add(bytes as u64);
        if self.memory > self.budget.max_memory {
            return Err(ExpressionError::ResourceLimit {
                kind: ResourceKind::Memory,
                limit: self.budget.max_memory,
            });
        }
        Ok(())
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
        Literal::Undefined => Value::Undefined,
    }
}

fn literal_key(node: &Node) -> Option<String> {
    match &node.value {
        Expression::Literal(Literal::String(s)) => Some(s.clone()),
        Expression::Literal(Literal::Number(n)) => Some(format_number(*n)),
        _ => None,
    }
}

fn is_root(node: &Node, root: &str) -> bool {
    matches!(&node.value, Expression::Identifier(name) if name == root)
}

fn describe_callee(node: &Node) -> String {
    match &node.value {
        Expression::Identifier(name) => name.clone(),
        Expression::Member { property, .. } => property.clone(),
        other => other.label().to_string(),
    }
}

fn not_defined(name: &str) -> ExpressionError {
    ExpressionError::NotDefined {
        name: name.to_string(),
    }
}

fn unsupported(message: &str) -> ExpressionError {
    ExpressionError::Unsupported {
        message: message.to_string(),
    }
}

fn unknown_method(method: &str, value_type: &str) -> ExpressionError {
    ExpressionError::UnknownMethod {
        method: method.to_string(),
        value_type: value_type.to_string(),
    }
}

/// Property read on a plain value
fn property(value: &Value, name: &str) -> Value {
    match value {
        Value::Object(map) => map.get(name).cloned().unwrap_or_default(),
        Value::Array(items) if name == "length" => Value::from(items.len()),
        Value::Array(items) => name
            .parse::<f64>()
            .map_or(Value::Undefined, |n| element(items, n)),
        Value::String(s) if name == "length" => Value::from(s.chars().count()),
        Value::String(s) => name
            .parse::<f64>()
            .map_or(Value::Undefined, |n| char_at(s, n)),
        Value::DateTime(dt) => date_property(dt, name),
        _ => Value::Undefined,
    }
}

fn element(items: &[Value], index: f64) -> Value {
    if index >= 0.0 && index.fract() == 0.0 {
        items.get(index as usize).cloned().unwrap_or_default()
    } else {
        Value::Undefined
    }
}

fn char_at(s: &str, index: f64) -> Value {
    if index >= 0.0 && index.fract() == 0.0 {
        s.chars()
            .nth(index as usize)
            .map_or(Value::Undefined, |c| Value::String(c.to_string()))
    } else {
        Value::Undefined
    }
}

fn date_property(dt: &chrono::DateTime<chrono::FixedOffset>, name: &str) -> Value {
    let unit = match name {
        "year" => DateUnit::Year,
        "month" => DateUnit::Month,
        "day" => DateUnit::Day,
        "hour" => DateUnit::Hour,
        "minute" => DateUnit::Minute,
        "second" => DateUnit::Second,
        "millisecond" => DateUnit::Millisecond,
        "weekNumber" => DateUnit::Week,
        "weekday" => return Value::from(f64::from(dt.weekday().number_from_monday())),
        "ordinal" => return Value::from(f64::from(dt.ordinal())),
        "offset" => return Value::from(f64::from(dt.offset().local_minus_utc() / 60)),
        _ => return Value::Undefined,
    };
    Value::Number(component(*dt, unit))
}

fn namespace_constant(namespace: Namespace, name: &str) -> Value {
    let n = match (namespace, name) {
        (Namespace::Math, "PI") => std::f64::consts::PI,
        (Namespace::Math, "E") => std::f64::consts::E,
        (Namespace::Math, "LN2") => std::f64::consts::LN_2,
        (Namespace::Math, "LN10") => std::f64::consts::LN_10,
        (Namespace::Math, "SQRT2") => std::f64::consts::SQRT_2,
        (Namespace::Number, "MAX_SAFE_INTEGER") => 9_007_199_254_740_991.0,
        (Namespace::Number, "MIN_SAFE_INTEGER") => -9_007_199_254_740_991.0,
        (Namespace::Number, "EPSILON") => f64::EPSILON,
        (Namespace::Number, "MAX_VALUE") => f64::MAX,
        (Namespace::Number, "MIN_VALUE") => 5e-324,
        (Namespace::Number, "POSITIVE_INFINITY") => f64::INFINITY,
        (Namespace::Number, "NEGATIVE_INFINITY") => f64::NEG_INFINITY,
        (Namespace::Number, "NaN") => f64::NAN,
        _ => return Value::Undefined,
    };
    Value::Number(n)
}

fn math(name: &str, args: &[Value]) -> Result<Value> {
    let numbers: Vec<f64> = args.iter().map(Value::to_number).collect();
    let x = numbers.first().copied().unwrap_or(f64::NAN);
    let y = numbers.get(1).copied().unwrap_or(f64::NAN);
    let n = match name {
        "abs" => x.abs(),
        "ceil" => x.ceil(),
        "floor" => x.floor(),
        "round" => crate::registry::js_round(x),
        "trunc" => x.trunc(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "exp" => x.exp(),
        "log" => x.ln(),
        "log10" => x.log10(),
        "log2" => x.log2(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "pow" => power(x, y),
        "hypot" => numbers.iter().map(|v| v * v).sum::<f64>().sqrt(),
        "min" => numbers.iter().copied().fold(f64::INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.min(v) }
        }),
        "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.max(v) }
        }),
        _ => return Err(unknown_method(name, "object")),
    };
    Ok(Value::Number(n))
}

fn number_function(name: &str, args: &[Value]) -> Result<Value> {
    let first = args.first().cloned().unwrap_or_default();
    let number = first.as_number();
    let value = match name {
        "isInteger" => Value::Bool(number.is_some_and(|n| n.is_finite() && n.fract() == 0.0)),
        "isSafeInteger" => Value::Bool(
            number.is_some_and(|n| n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_991.0),
        ),
        "isFinite" => Value::Bool(number.is_some_and(f64::is_finite)),
        "isNaN" => Value::Bool(number.is_some_and(f64::is_nan)),
        "parseFloat" => Value::Number(parse_float(&first.to_js_string())),
        "parseInt" => Value::Number(parse_int(
            &first.to_js_string(),
            args.get(1).filter(|v| !v.is_nullish()).map(Value::to_number),
        )),
        _ => return Err(unknown_method(name, "object")),
    };
    Ok(value)
}

fn unary(operator: UnaryOperator, value: &Value) -> Value {
    match operator {
        UnaryOperator::Not => Value::Bool(!value.is_truthy()),
        UnaryOperator::Negate => Value::Number(-value.to_number()),
        UnaryOperator::Plus => Value::Number(value.to_number()),
        UnaryOperator::TypeOf => Value::from(type_of(value)),
    }
}

/// JavaScript `typeof`
fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Function(_) | Value::Host(HostValue::Builtin(_)) => "function",
        _ => "object",
    }
}

/// Whether `+` with this operand concatenates text
fn concatenates(value: &Value) -> bool {
    !matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

/// `**` with JavaScript's NaN rules
fn power(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        f64::NAN
    } else {
        base.powf(exponent)
    }
}

/// Relational comparison: text when both sides are strings, numeric otherwise
fn compare(lhs: &Value, rhs: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return accept(a.as_str().cmp(b.as_str()));
    }
    lhs.to_number()
        .partial_cmp(&rhs.to_number())
        .is_some_and(accept)
}

/// JavaScript `parseInt`
pub(crate) fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let explicit = radix.map(f64::trunc).filter(|r| !r.is_nan() && *r != 0.0);
    let mut radix = match explicit {
        None => 10,
        Some(r) if (2.0..=36.0).contains(&r) => r as u32,
        Some(_) => return f64::NAN,
    };
    let mut digits = digits;
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if explicit.is_none() || radix == 16 {
            radix = 16;
            digits = hex;
        }
    }
    let mut value = 0.0;
    let mut any = false;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        value = value * f64::from(radix) + f64::from(d);
        any = true;
    }
    match (any, negative) {
        (false, _) => f64::NAN,
        (true, true) => -value,
        (true, false) => value,
    }
}

/// JavaScript `parseFloat`
pub(crate) fn parse_float(text: &str) -> f64 {
    let Some(m) = FLOAT_PREFIX.find(text.trim_start()) else {
        return f64::NAN;
    };
    match m.as_str().trim_start_matches('+') {
        "Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        number => number.parse().unwrap_or(f64::NAN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use crate::security::SecurityConfig;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;

    fn run_with(text: &str, ctx: &ExpressionContext, config: SecurityConfig) -> Result<Value> {
        let policy = SecurityPolicy::new(config).unwrap();
        let registry = ExtensionRegistry::shared();
        let node = parse_expression(text).unwrap();
        let budget = Budget::from_policy(&policy, Instant::now());
        let mut interpreter = Interpreter::new(
            ctx,
            &policy,
            &registry,
            Libraries { date_time: true },
            budget,
            None,
        );
        interpreter.eval(&node)
    }

    fn run(text: &str) -> Result<Value> {
        let ctx = ExpressionContext::new(json!({
            "name": "Ada",
            "items": [{"price": 2}, {"price": 3}],
            "nested": {"deep": null}
        }));
        run_with(text, &ctx, SecurityConfig::default())
    }

    #[rstest]
    #[case("1 + 1", json!(2))]
    #[case("'a' + 1", json!("a1"))]
    #[case("2 ** 3 ** 2", json!(512))]
    #[case("7 % 3", json!(1))]
    #[case("1 == '1'", json!(true))]
    #[case("1 === '1'", json!(false))]
    #[case("'b' > 'a'", json!(true))]
    #[case("null ?? 'x'", json!("x"))]
    #[case("0 || 'y'", json!("y"))]
    #[case("typeof $json.name", json!("string"))]
    #[case("$json.items.map(i => i.price * 2)", json!([4, 6]))]
    #[case("$json.items.reduce((sum, i) => sum + i.price, 0)", json!(5))]
    #[case("$json.nested?.deep?.value", serde_json::Value::Null)]
    #[case("$json['name'].length", json!(3))]
    #[case("Math.max(1, 5, 3)", json!(5))]
    #[case("Math.max(1, 5, 3, 9, 2, 7)", json!(9))]
    #[case("Math.round(2.5)", json!(3))]
    #[case("JSON.stringify({a: [1, 2]})", json!("{\"a\":[1,2]}"))]
    #[case("Object.keys({a: 1, b: 2})", json!(["a", "b"]))]
    #[case("Array.isArray([1])", json!(true))]
    #[case("parseInt('42px')", json!(42))]
    #[case("parseFloat('3.5kg')", json!(3.5))]
    #[case("String(12)", json!("12"))]
    #[case("Number('7')", json!(7))]
    #[case("[1, [2]].flat()", json!([1, 2]))]
    fn evaluates_expressions(#[case] text: &str, #[case] expected: serde_json::Value) {
        assert_eq!(run(text).unwrap().to_json(), expected);
    }

    #[test]
    fn closures_capture_outer_parameters() {
        let value = run("[1, 2].map(a => [10, 20].map(b => a + b))").unwrap();
        assert_eq!(value.to_json(), json!([[11, 21], [12, 22]]));
    }

    #[test]
    fn unknown_identifiers_are_not_defined() {
        let err = run("secret").unwrap_err();
        assert_eq!(err, ExpressionError::NotDefined { name: "secret".into() });
    }

    #[test]
    fn removed_globals_become_undefined_names() {
        let ctx = ExpressionContext::default();
        let config = SecurityConfig {
            allowed_globals: vec!["$json".into()],
            ..Default::default()
        };
        let err = run_with("Math.max(1, 2)", &ctx, config).unwrap_err();
        assert_eq!(err.kind(), "not_defined_error");
    }

    #[test]
    fn null_receivers_fail_with_hint() {
        let err = run("$json.missing.trim()").unwrap_err();
        assert!(matches!(err, ExpressionError::NullReceiver { ref method, .. } if method == "trim"));
        assert_eq!(run("$json.missing?.trim()").unwrap(), Value::Undefined);
    }

    #[test]
    fn property_of_null_fails() {
        let err = run("$json.nested.deep.value").unwrap_err();
        assert_eq!(err.kind(), "null_property_error");
    }

    #[test]
    fn env_writes_are_read_only() {
        let err = run("$env.TOKEN = 'x'").unwrap_err();
        assert_eq!(err.kind(), "read_only_error");
        let err = run("$json.name = 'x'").unwrap_err();
        assert_eq!(err.kind(), "unsupported_error");
    }

    #[test]
    fn call_stack_ceiling() {
        let ctx = ExpressionContext::default();
        let config = SecurityConfig {
            max_call_stack_size: 3,
            ..Default::default()
        };
        let err = run_with(
            "[1].map(a => [2].map(b => [3].map(c => [4].map(d => d))))",
            &ctx,
            config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::ResourceLimit {
                kind: ResourceKind::CallStack,
                ..
            }
        ));
    }

    #[test]
    fn memory_ceiling() {
        let ctx = ExpressionContext::default();
        let config = SecurityConfig {
            max_memory: 1024,
            ..Default::default()
        };
        let err = run_with("'abc'.repeat(1000)", &ctx, config).unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::ResourceLimit {
                kind: ResourceKind::Memory,
                limit: 1024
            }
        ));
    }

    #[rstest]
    #[case("Array.from({length: 1e19})")]
    #[case("Array.from({length: 1e300}, (x, i) => i)")]
    #[case("Array.from({length: 2 ** 62})")]
    fn huge_array_lengths_hit_the_memory_ceiling(#[case] text: &str) {
        let err = run(text).unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::ResourceLimit {
                kind: ResourceKind::Memory,
                ..
            }
        ));
    }

    #[test]
    fn array_from_length_builds_indices() {
        let value = run("Array.from({length: 3}, (x, i) => i * 2)").unwrap();
        assert_eq!(value.to_json(), json!([0, 2, 4]));
    }

    #[test]
    fn deadline_stops_long_callbacks() {
        let ctx = ExpressionContext::default();
        let policy = SecurityPolicy::new(SecurityConfig::default()).unwrap();
        let registry = ExtensionRegistry::shared();
        let node = parse_expression("[1, 2, 3].map(x => x * 2)").unwrap();
        let budget = Budget {
            deadline: Instant::now() - Duration::from_millis(1),
            timeout_ms: 5,
            max_frames: 100,
            max_memory: 1 << 20,
        };
        let mut interpreter = Interpreter::new(
            &ctx,
            &policy,
            &registry,
            Libraries { date_time: true },
            budget,
            None,
        );
        let err = interpreter.eval(&node).unwrap_err();
        assert_eq!(err, ExpressionError::Timeout { timeout_ms: 5 });
    }

    #[test]
    fn cancellation_is_observed() {
        let ctx = ExpressionContext::default();
        let policy = SecurityPolicy::new(SecurityConfig::default()).unwrap();
        let registry = ExtensionRegistry::shared();
        let node = parse_expression("[1, 2].map(x => x)").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let mut interpreter = Interpreter::new(
            &ctx,
            &policy,
            &registry,
            Libraries { date_time: true },
            Budget::from_policy(&policy, Instant::now()),
            Some(&token),
        );
        assert_eq!(interpreter.eval(&node).unwrap_err(), ExpressionError::Cancelled);
    }

    #[test]
    fn strict_grammar_rejects_computed_keys() {
        let ctx = ExpressionContext::new(json!({"a": 1, "key": "a"}));
        let config = SecurityConfig {
            strict_grammar: true,
            ..Default::default()
        };
        assert_eq!(run_with("$json['a']", &ctx, config.clone()).unwrap(), Value::from(1.0));
        let err = run_with("$json[$json.key]", &ctx, config).unwrap_err();
        assert_eq!(err.kind(), "security_error");
    }

    #[test]
    fn allowed_methods_restrict_registry_calls() {
        let ctx = ExpressionContext::new(json!({"name": " x "}));
        let config = SecurityConfig {
            allowed_methods: vec!["trim".into()],
            ..Default::default()
        };
        assert_eq!(run_with("$json.name.trim()", &ctx, config.clone()).unwrap(), Value::from("x"));
        let err = run_with("$json.name.toUpperCase()", &ctx, config).unwrap_err();
        assert_eq!(err.kind(), "security_error");
    }

    #[test]
    fn node_references_resolve() {
        let ctx = ExpressionContext::builder()
            .json(json!({}))
            .node("Webhook", json!({"id": 7}))
            .build();
        let config = SecurityConfig::default();
        assert_eq!(
            run_with("$('Webhook').item.json.id", &ctx, config.clone()).unwrap(),
            Value::from(7.0)
        );
        assert_eq!(
            run_with("$node['Webhook'].json.id", &ctx, config.clone()).unwrap(),
            Value::from(7.0)
        );
        assert_eq!(
            run_with("$('Webhook').all().length", &ctx, config.clone()).unwrap(),
            Value::from(1.0)
        );
        let err = run_with("$('Nope').item", &ctx, config).unwrap_err();
        assert_eq!(err.kind(), "no_node_execution_data");
    }

    #[test]
    fn input_items() {
        let ctx = ExpressionContext::builder()
            .json(json!({"n": 2}))
            .input(vec![Value::from(json!({"n": 1})), Value::from(json!({"n": 2}))])
            .item_index(1)
            .build();
        let config = SecurityConfig::default();
        assert_eq!(run_with("$input.item.json.n", &ctx, config.clone()).unwrap(), Value::from(2.0));
        assert_eq!(run_with("$input.first().json.n", &ctx, config.clone()).unwrap(), Value::from(1.0));
        assert_eq!(run_with("$input.all().length", &ctx, config).unwrap(), Value::from(2.0));
    }

    #[test]
    fn dates_expose_components() {
        let ctx = ExpressionContext::default();
        let value = run_with(
            "DateTime.fromISO('2024-03-05T10:20:30Z').year",
            &ctx,
            SecurityConfig::default(),
        )
        .unwrap();
        assert_eq!(value, Value::from(2024.0));
    }

    #[rstest]
    #[case("0x1A", None, 26.0)]
    #[case("  -12.7", None, -12.0)]
    #[case("ff", Some(16.0), 255.0)]
    #[case("101", Some(2.0), 5.0)]
    fn parse_int_prefixes(#[case] text: &str, #[case] radix: Option<f64>, #[case] expected: f64) {
        assert_eq!(parse_int(text, radix), expected);
    }

    #[test]
    fn parse_int_without_digits_is_nan() {
        assert!(parse_int("px", None).is_nan());
        assert!(parse_int("1", Some(1.0)).is_nan());
        assert!(parse_float("abc").is_nan());
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
    }
}
