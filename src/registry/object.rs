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

//! Object methods

use url::form_urlencoded;

use super::{CallSite, ExtensionRegistry, MethodDoc, MethodImpl, ObjectMethod, arg, doc, str_arg};
use crate::error::{ExpressionError, Result};
use crate::model::{ObjectMap, Value};

const METHODS: &[(&str, ObjectMethod, MethodDoc)] = &[
    ("keys", keys, doc("keys()", "Field names in order", "{a: 1}.keys()")),
    ("values", values, doc("values()", "Field values in order", "{a: 1}.values()")),
    (
        "entries",
        entries,
        doc("entries()", "[name, value] pairs", "{a: 1}.entries()"),
    ),
    ("isEmpty", is_empty, doc("isEmpty()", "Whether there are no fields", "{}.isEmpty()")),
    (
        "isNotEmpty",
        is_not_empty,
        doc("isNotEmpty()", "Whether there are fields", "{a: 1}.isNotEmpty()"),
    ),
    (
        "hasField",
        has_field,
        doc("hasField(name)", "Whether a field exists", "{a: 1}.hasField('a')"),
    ),
    (
        "removeField",
        remove_field,
        doc("removeField(name)", "Copy without the field", "{a: 1, b: 2}.removeField('a')"),
    ),
    (
        "merge",
        merge,
        doc("merge(other)", "Copy with fields of other added where missing", "{a: 1}.merge({b: 2})"),
    ),
    (
        "compact",
        compact,
        doc("compact()", "Drop null, undefined and empty fields", "{a: null, b: 1}.compact()"),
    ),
    (
        "urlEncode",
        url_encode,
        doc("urlEncode()", "Encode as a query string", "{q: 'a b'}.urlEncode()"),
    ),
    (
        "toJsonString",
        to_json_string,
        doc("toJsonString()", "Serialize as JSON", "{a: 1}.toJsonString()"),
    ),
    ("toString", to_string, doc("toString()", "'[object Object]'", "{}.toString()")),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::Object(method), method_doc);
    }
}

fn keys(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::Array(map.keys().map(|k| Value::from(k.as_str())).collect()))
}

fn values(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::Array(map.values().cloned().collect()))
}

fn entries(site: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    site.reserve(map.len() * 32)?;
    Ok(Value::Array(
        map.iter()
            .map(|(k, v)| Value::Array(vec![Value::from(k.as_str()), v.clone()]))
            .collect(),
    ))
}

fn is_empty(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(map.is_empty()))
}

fn is_not_empty(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!map.is_empty()))
}

fn has_field(_: &mut dyn CallSite, map: &ObjectMap, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(map.contains_key(str_arg(args, 0, "hasField")?)))
}

fn remove_field(_: &mut dyn CallSite, map: &ObjectMap, args: &[Value]) -> Result<Value> {
    let name = str_arg(args, 0, "removeField")?;
    let mut out = map.clone();
    out.shift_remove(name);
    Ok(Value::Object(out))
}

fn merge(site: &mut dyn CallSite, map: &ObjectMap, args: &[Value]) -> Result<Value> {
    let Value::Object(other) = arg(args, 0) else {
        return Err(ExpressionError::invalid_argument(
            "merge",
            "expected an object to merge",
        ));
    };
    let mut out = map.clone();
    for (k, v) in other {
        out.entry(k.clone()).or_insert_with(|| v.clone());
    }
    site.reserve(out.len() * 32)?;
    Ok(Value::Object(out))
}

fn compact(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::Object(
        map.iter()
            .filter(|(_, v)| match v {
                Value::Null | Value::Undefined => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    ))
}

fn url_encode(_: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in map {
        if !v.is_nullish() {
            serializer.append_pair(k, &v.to_js_string());
        }
    }
    Ok(Value::String(serializer.finish()))
}

fn to_json_string(site: &mut dyn CallSite, map: &ObjectMap, _: &[Value]) -> Result<Value> {
    let text = Value::Object(map.clone()).to_json().to_string();
    site.reserve(text.len())?;
    Ok(Value::String(text))
}

fn to_string(_: &mut dyn CallSite, _: &ObjectMap, _: &[Value]) -> Result<Value> {
    Ok(Value::from("[object Object]"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::call;
    use crate::model::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn keys_keep_insertion_order() {
        let object = Value::from(json!({"b": 1, "a": 2}));
        assert_eq!(call(object, "keys", &[]).unwrap(), Value::from(json!(["b", "a"])));
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let object = Value::from(json!({"a": 1}));
        let merged = call(object, "merge", &[Value::from(json!({"a": 9, "b": 2}))]).unwrap();
        assert_eq!(merged, Value::from(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn query_string_encoding() {
        let object = Value::from(json!({"q": "a b", "n": 1, "skip": null}));
        assert_eq!(call(object, "urlEncode", &[]).unwrap(), Value::from("q=a+b&n=1"));
    }

    #[test]
    fn field_helpers() {
        let object = Value::from(json!({"a": 1, "b": ""}));
        assert_eq!(
            call(object.clone(), "hasField", &[Value::from("a")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(call(object.clone(), "compact", &[]).unwrap(), Value::from(json!({"a": 1})));
        assert_eq!(
            call(object, "removeField", &[Value::from("a")]).unwrap(),
            Value::from(json!({"b": ""}))
        );
    }
}
