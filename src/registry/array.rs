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

//! Array methods
//!
//! Callbacks receive `(item, index)`; `reduce` callbacks receive
//! `(accumulator, item, index)`. Every callback invocation goes through the
//! call site so the interpreter's step, depth and memory budgets apply.

use std::cmp::Ordering;

use super::{
    ArrayMethod, CallSite, ExtensionRegistry, MethodDoc, MethodImpl, arg, doc, fn_arg, num_arg,
    opt_num_arg, opt_str_arg, relative_index, str_arg,
};
use crate::error::{ExpressionError, Result};
use crate::model::{ObjectMap, Value};

const METHODS: &[(&str, ArrayMethod, MethodDoc)] = &[
    (
        "map",
        map,
        doc("map(fn)", "Transform every item", "[1, 2].map(x => x * 2)"),
    ),
    (
        "filter",
        filter,
        doc("filter(fn)", "Keep items the callback accepts", "[1, 2].filter(x => x > 1)"),
    ),
    (
        "find",
        find,
        doc("find(fn)", "First item the callback accepts", "[1, 2].find(x => x > 1)"),
    ),
    (
        "findIndex",
        find_index,
        doc("findIndex(fn)", "Index of the first accepted item or -1", "[1, 2].findIndex(x => x > 1)"),
    ),
    (
        "some",
        some,
        doc("some(fn)", "Whether any item is accepted", "[1, 2].some(x => x > 1)"),
    ),
    (
        "every",
        every,
        doc("every(fn)", "Whether all items are accepted", "[1, 2].every(x => x > 0)"),
    ),
    (
        "reduce",
        reduce,
        doc("reduce(fn, initial?)", "Fold items into one value", "[1, 2].reduce((a, b) => a + b, 0)"),
    ),
    (
        "sort",
        sort,
        doc("sort(fn?)", "Sorted copy; text order without a comparator", "[3, 1].sort((a, b) => a - b)"),
    ),
    (
        "join",
        join,
        doc("join(separator?)", "Concatenate items as text", "['a', 'b'].join('-')"),
    ),
    (
        "includes",
        includes,
        doc("includes(value)", "Whether the array contains value", "[1, 2].includes(2)"),
    ),
    (
        "indexOf",
        index_of,
        doc("indexOf(value)", "Index of value or -1", "[1, 2].indexOf(2)"),
    ),
    (
        "slice",
        slice,
        doc("slice(start?, end?)", "Sub-array; negative indices count from the end", "[1, 2, 3].slice(-2)"),
    ),
    (
        "concat",
        concat,
        doc("concat(...values)", "Append arrays or values", "[1].concat([2], 3)"),
    ),
    ("reverse", reverse, doc("reverse()", "Reversed copy", "[1, 2].reverse()")),
    (
        "flat",
        flat,
        doc("flat(depth?)", "Flatten nested arrays", "[[1], [2, [3]]].flat()"),
    ),
    (
        "at",
        at,
        doc("at(index)", "Item at index; negative counts from the end", "[1, 2].at(-1)"),
    ),
    ("first", first, doc("first()", "First item", "[1, 2].first()")),
    ("last", last, doc("last()", "Last item", "[1, 2].last()")),
    ("isEmpty", is_empty, doc("isEmpty()", "Whether the array has no items", "[].isEmpty()")),
    (
        "isNotEmpty",
        is_not_empty,
        doc("isNotEmpty()", "Whether the array has items", "[1].isNotEmpty()"),
    ),
    (
        "pluck",
        pluck,
        doc("pluck(...fields)", "Field values from each object item", "$input.all().pluck('id')"),
    ),
    ("sum", sum, doc("sum()", "Sum of numeric items", "[1, 2].sum()")),
    ("min", min, doc("min()", "Smallest numeric item", "[1, 2].min()")),
    ("max", max, doc("max()", "Largest numeric item", "[1, 2].max()")),
    ("average", average, doc("average()", "Mean of numeric items", "[1, 2].average()")),
    (
        "unique",
        unique,
        doc("unique(...fields?)", "Drop duplicates, optionally by fields", "[1, 1, 2].unique()"),
    ),
    (
        "removeDuplicates",
        unique,
        doc("removeDuplicates(...fields?)", "Drop duplicates, optionally by fields", "[1, 1].removeDuplicates()"),
    ),
    (
        "compact",
        compact,
        doc("compact()", "Drop null, undefined and empty values", "[1, null, ''].compact()"),
    ),
    (
        "chunk",
        chunk,
        doc("chunk(size)", "Split into arrays of size items", "[1, 2, 3].chunk(2)"),
    ),
    (
        "difference",
        difference,
        doc("difference(other)", "Items not in other", "[1, 2].difference([2])"),
    ),
    (
        "intersection",
        intersection,
        doc("intersection(other)", "Items also in other", "[1, 2].intersection([2])"),
    ),
    (
        "union",
        union,
        doc("union(other)", "Items of both without duplicates", "[1].union([1, 2])"),
    ),
    (
        "append",
        append,
        doc("append(...items)", "Copy with items added at the end", "[1].append(2, 3)"),
    ),
    (
        "smartJoin",
        smart_join,
        doc(
            "smartJoin(keyField, valueField)",
            "Build an object from key and value fields",
            "[{k: 'a', v: 1}].smartJoin('k', 'v')",
        ),
    ),
    (
        "toJsonString",
        to_json_string,
        doc("toJsonString()", "Serialize as JSON", "[1, 2].toJsonString()"),
    ),
    ("toString", to_string, doc("toString()", "Comma-joined text", "[1, 2].toString()")),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::Array(method), method_doc);
    }
}

const SLOT: usize = 16;

fn array(items: Vec<Value>) -> Result<Value> {
    Ok(Value::Array(items))
}

/// SameValueZero: strict equality where NaN equals NaN
fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn contains(items: &[Value], needle: &Value) -> bool {
    items.iter().any(|item| same_value_zero(item, needle))
}

fn map(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let f = fn_arg(args, 0, "map")?;
    site.reserve(items.len() * SLOT)?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        out.push(site.call(f, &[item.clone(), Value::from(i)])?);
    }
    array(out)
}

fn filter(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let f = fn_arg(args, 0, "filter")?;
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if site.call(f, &[item.clone(), Value::from(i)])?.is_truthy() {
            out.push(item.clone());
        }
    }
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn position(
    site: &mut dyn CallSite,
    items: &[Value],
    args: &[Value],
    method: &str,
) -> Result<Option<usize>> {
    let f = fn_arg(args, 0, method)?;
    for (i, item) in items.iter().enumerate() {
        if site.call(f, &[item.clone(), Value::from(i)])?.is_truthy() {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn find(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    Ok(position(site, items, args, "find")?.map_or(Value::Undefined, |i| items[i].clone()))
}

fn find_index(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    Ok(position(site, items, args, "findIndex")?
        .map_or(Value::Number(-1.0), Value::from))
}

fn some(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(position(site, items, args, "some")?.is_some()))
}

fn every(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let f = fn_arg(args, 0, "every")?;
    for (i, item) in items.iter().enumerate() {
        if !site.call(f, &[item.clone(), Value::from(i)])?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn reduce(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let f = fn_arg(args, 0, "reduce")?;
    let (mut accumulator, start) = match args.get(1) {
        Some(initial) => (initial.clone(), 0),
        None => match items.first() {
            Some(first) => (first.clone(), 1),
            None => {
                return Err(ExpressionError::invalid_argument(
                    "reduce",
                    "Reduce of empty array with no initial value",
                ));
            }
        },
    };
    for (i, item) in items.iter().enumerate().skip(start) {
        accumulator = site.call(f, &[accumulator, item.clone(), Value::from(i)])?;
    }
    Ok(accumulator)
}

/// Stable merge sort with a fallible comparator
///
/// User comparators need not be consistent, so the standard sort (which may
/// panic on an inconsistent order) is not used.
fn merge_sort<F>(items: Vec<Value>, compare: &mut F) -> Result<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> Result<Ordering>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(l, r)? == Ordering::Greater,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn sort(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    site.reserve(items.len() * SLOT)?;
    // undefined always sorts last and is never passed to the comparator
    let (mut defined, undefined): (Vec<Value>, Vec<Value>) = items
        .iter()
        .cloned()
        .partition(|v| !matches!(v, Value::Undefined));

    defined = match arg(args, 0) {
        Value::Undefined => merge_sort(defined, &mut |a: &Value, b: &Value| {
            Ok(a.to_js_string().cmp(&b.to_js_string()))
        })?,
        _ => {
            let f = fn_arg(args, 0, "sort")?;
            merge_sort(defined, &mut |a: &Value, b: &Value| {
                let n = site.call(f, &[a.clone(), b.clone()])?.to_number();
                Ok(if n > 0.0 {
                    Ordering::Greater
                } else if n < 0.0 {
                    Ordering::Less
                } else {
                    Ordering::Equal
                })
            })?
        }
    };
    defined.extend(undefined);
    array(defined)
}

fn join(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let separator = opt_str_arg(args, 0, "join")?.unwrap_or(",");
    let text = items
        .iter()
        .map(|item| {
            if item.is_nullish() {
                String::new()
            } else {
                item.to_js_string()
            }
        })
        .collect::<Vec<_>>()
        .join(separator);
    site.reserve(text.len())?;
    Ok(Value::String(text))
}

fn includes(_: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(contains(items, arg(args, 0))))
}

fn index_of(_: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let needle = arg(args, 0);
    Ok(items
        .iter()
        .position(|item| item.strict_equals(needle))
        .map_or(Value::Number(-1.0), Value::from))
}

fn slice(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let len = items.len();
    let start = relative_index(opt_num_arg(args, 0).unwrap_or(0.0), len);
    let end = opt_num_arg(args, 1).map_or(len, |e| relative_index(e, len));
    if start >= end {
        return array(Vec::new());
    }
    site.reserve((end - start) * SLOT)?;
    array(items[start..end].to_vec())
}

fn concat(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let mut out = items.to_vec();
    for value in args {
        match value {
            Value::Array(more) => out.extend(more.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn reverse(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    array(items.iter().rev().cloned().collect())
}

fn flatten_into(out: &mut Vec<Value>, items: &[Value], depth: usize) {
    for item in items {
        match item {
            Value::Array(nested) if depth > 0 => flatten_into(out, nested, depth - 1),
            other => out.push(other.clone()),
        }
    }
}

fn flat(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let depth = opt_num_arg(args, 0).unwrap_or(1.0).clamp(0.0, 64.0) as usize;
    let mut out = Vec::new();
    flatten_into(&mut out, items, depth);
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn at(_: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let index = opt_num_arg(args, 0).unwrap_or(0.0).trunc();
    let len = items.len() as f64;
    let position = if index < 0.0 { len + index } else { index };
    if position < 0.0 || position >= len {
        return Ok(Value::Undefined);
    }
    Ok(items[position as usize].clone())
}

fn first(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(items.first().cloned().unwrap_or_default())
}

fn last(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(items.last().cloned().unwrap_or_default())
}

fn is_empty(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(items.is_empty()))
}

fn is_not_empty(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!items.is_empty()))
}

fn field_names<'a>(args: &'a [Value], method: &str) -> Result<Vec<&'a str>> {
    (0..args.len()).map(|i| str_arg(args, i, method)).collect()
}

fn pluck(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let fields = field_names(args, "pluck")?;
    let out: Vec<Value> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|object| match fields.as_slice() {
            [] => Some(Value::Object(object.clone())),
            [single] => object.get(*single).cloned(),
            many => {
                let picked: ObjectMap = many
                    .iter()
                    .filter_map(|f| object.get(*f).map(|v| (f.to_string(), v.clone())))
                    .collect();
                Some(Value::Object(picked))
            }
        })
        .collect();
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn numbers(items: &[Value], method: &str) -> Result<Vec<f64>> {
    items
        .iter()
        .map(|item| {
            let n = item.to_number();
            if n.is_nan() {
                Err(ExpressionError::invalid_argument(
                    method,
                    format!("item '{}' is not a number", item.to_js_string()),
                ))
            } else {
                Ok(n)
            }
        })
        .collect()
}

fn sum(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(Value::Number(numbers(items, "sum")?.iter().sum()))
}

fn min(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    let values = numbers(items, "min")?;
    Ok(values
        .into_iter()
        .reduce(f64::min)
        .map_or(Value::Undefined, Value::Number))
}

fn max(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    let values = numbers(items, "max")?;
    Ok(values
        .into_iter()
        .reduce(f64::max)
        .map_or(Value::Undefined, Value::Number))
}

fn average(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    let values = numbers(items, "average")?;
    if values.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn unique(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let fields = field_names(args, "unique")?;
    let key = |item: &Value| -> Value {
        match (item, fields.is_empty()) {
            (Value::Object(object), false) => Value::Array(
                fields
                    .iter()
                    .map(|f| object.get(*f).cloned().unwrap_or_default())
                    .collect(),
            ),
            _ => item.clone(),
        }
    };
    let mut seen: Vec<Value> = Vec::new();
    let mut out = Vec::new();
    for item in items {
        let k = key(item);
        if !contains(&seen, &k) {
            seen.push(k);
            out.push(item.clone());
        }
    }
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn compact(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    array(
        items
            .iter()
            .filter(|item| match item {
                Value::Null | Value::Undefined => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .cloned()
            .collect(),
    )
}

fn chunk(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let size = num_arg(args, 0, "chunk")?;
    if size.is_nan() || size < 1.0 {
        return Err(ExpressionError::invalid_argument(
            "chunk",
            "size must be at least 1",
        ));
    }
    let size = size.min(items.len().max(1) as f64) as usize;
    site.reserve(items.len() * SLOT)?;
    array(
        items
            .chunks(size)
            .map(|c| Value::Array(c.to_vec()))
            .collect(),
    )
}

fn other_array<'a>(args: &'a [Value], method: &str) -> Result<&'a [Value]> {
    match arg(args, 0) {
        Value::Array(other) => Ok(other),
        value => Err(ExpressionError::invalid_argument(
            method,
            format!("expected an array, got {}", value.type_tag()),
        )),
    }
}

fn difference(_: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let other = other_array(args, "difference")?;
    array(items.iter().filter(|i| !contains(other, i)).cloned().collect())
}

fn intersection(_: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let other = other_array(args, "intersection")?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if contains(other, item) && !contains(&out, item) {
            out.push(item.clone());
        }
    }
    array(out)
}

fn union(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let other = other_array(args, "union")?;
    let mut out: Vec<Value> = Vec::new();
    for item in items.iter().chain(other) {
        if !contains(&out, item) {
            out.push(item.clone());
        }
    }
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn append(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let mut out = items.to_vec();
    out.extend(args.iter().cloned());
    site.reserve(out.len() * SLOT)?;
    array(out)
}

fn smart_join(site: &mut dyn CallSite, items: &[Value], args: &[Value]) -> Result<Value> {
    let key_field = str_arg(args, 0, "smartJoin")?;
    let value_field = str_arg(args, 1, "smartJoin")?;
    let mut out = ObjectMap::new();
    for object in items.iter().filter_map(Value::as_object) {
        if let Some(key) = object.get(key_field) {
            let value = object.get(value_field).cloned().unwrap_or_default();
            out.insert(key.to_js_string(), value);
        }
    }
    site.reserve(out.len() * SLOT)?;
    Ok(Value::Object(out))
}

fn to_json_string(site: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    let text = Value::Array(items.to_vec()).to_json().to_string();
    site.reserve(text.len())?;
    Ok(Value::String(text))
}

fn to_string(_: &mut dyn CallSite, items: &[Value], _: &[Value]) -> Result<Value> {
    Ok(Value::String(Value::Array(items.to_vec()).to_js_string()))
}

#[cfg(test)]
mod tests {
    use super::super::testing::call;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn arr(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn default_sort_is_textual_and_stable() {
        assert_eq!(
            call(arr(json!([10, 9, 1])), "sort", &[]).unwrap(),
            arr(json!([1, 10, 9]))
        );
    }

    #[test]
    fn merge_sort_propagates_comparator_errors() {
        let items = vec![Value::from(2.0), Value::from(1.0)];
        let result = merge_sort(items, &mut |_: &Value, _: &Value| {
            Err(ExpressionError::Cancelled)
        });
        assert_eq!(result.unwrap_err(), ExpressionError::Cancelled);
    }

    #[test]
    fn lambdas_require_a_function_argument() {
        let err = call(arr(json!([1])), "map", &[Value::from(1.0)]).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidArgument { .. }));
    }

    #[test]
    fn aggregates() {
        assert_eq!(call(arr(json!([1, 2, 3])), "sum", &[]).unwrap(), Value::from(6.0));
        assert_eq!(call(arr(json!([1, 2, 3])), "average", &[]).unwrap(), Value::from(2.0));
        assert_eq!(call(arr(json!([4, 2, 8])), "max", &[]).unwrap(), Value::from(8.0));
        assert_eq!(call(arr(json!([])), "min", &[]).unwrap(), Value::Undefined);
        assert!(call(arr(json!(["x"])), "sum", &[]).is_err());
    }

    #[test]
    fn pluck_and_smart_join() {
        let items = arr(json!([{"id": 1, "n": "a"}, {"id": 2, "n": "b"}, 5]));
        assert_eq!(
            call(items.clone(), "pluck", &[Value::from("id")]).unwrap(),
            arr(json!([1, 2]))
        );
        assert_eq!(
            call(items, "smartJoin", &[Value::from("n"), Value::from("id")]).unwrap(),
            arr(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn set_operations() {
        let a = arr(json!([1, 2, 2, 3]));
        assert_eq!(call(a.clone(), "unique", &[]).unwrap(), arr(json!([1, 2, 3])));
        assert_eq!(
            call(a.clone(), "difference", &[arr(json!([2]))]).unwrap(),
            arr(json!([1, 3]))
        );
        assert_eq!(
            call(a.clone(), "intersection", &[arr(json!([3, 2]))]).unwrap(),
            arr(json!([2, 3]))
        );
        assert_eq!(
            call(a, "union", &[arr(json!([4]))]).unwrap(),
            arr(json!([1, 2, 3, 4]))
        );
    }

    #[test]
    fn unique_by_field() {
        let items = arr(json!([{"k": 1, "v": "a"}, {"k": 1, "v": "b"}, {"k": 2}]));
        assert_eq!(
            call(items, "unique", &[Value::from("k")]).unwrap(),
            arr(json!([{"k": 1, "v": "a"}, {"k": 2}]))
        );
    }

    #[test]
    fn chunk_flat_and_slice() {
        assert_eq!(
            call(arr(json!([1, 2, 3])), "chunk", &[Value::from(2.0)]).unwrap(),
            arr(json!([[1, 2], [3]]))
        );
        assert_eq!(
            call(arr(json!([[1], [2, [3]]])), "flat", &[]).unwrap(),
            arr(json!([1, 2, [3]]))
        );
        assert_eq!(
            call(arr(json!([1, 2, 3])), "slice", &[Value::from(-2.0)]).unwrap(),
            arr(json!([2, 3]))
        );
        assert!(call(arr(json!([1])), "chunk", &[Value::from(0.0)]).is_err());
    }

    #[test]
    fn join_renders_nullish_empty() {
        assert_eq!(
            call(arr(json!(["a", null, 1])), "join", &[Value::from("-")]).unwrap(),
            Value::from("a--1")
        );
    }

    #[test]
    fn reduce_requires_a_callback() {
        assert!(call(arr(json!([])), "reduce", &[]).is_err());
    }
}
