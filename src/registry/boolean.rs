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

//! Boolean methods

use super::{BooleanMethod, CallSite, ExtensionRegistry, MethodDoc, MethodImpl, doc};
use crate::error::Result;
use crate::model::Value;

const METHODS: &[(&str, BooleanMethod, MethodDoc)] = &[
    (
        "toString",
        to_string,
        doc("toString()", "'true' or 'false'", "true.toString()"),
    ),
    ("toNumber", to_number, doc("toNumber()", "1 or 0", "true.toNumber()")),
    ("toInt", to_number, doc("toInt()", "1 or 0", "false.toInt()")),
    ("not", not, doc("not()", "Logical negation", "true.not()")),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::Boolean(method), method_doc);
    }
}

fn to_string(_: &mut dyn CallSite, b: bool, _: &[Value]) -> Result<Value> {
    Ok(Value::String(b.to_string()))
}

fn to_number(_: &mut dyn CallSite, b: bool, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(if b { 1.0 } else { 0.0 }))
}

fn not(_: &mut dyn CallSite, b: bool, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!b))
}

#[cfg(test)]
mod tests {
    use super::super::testing::call;
    use crate::model::Value;

    #[test]
    fn boolean_conversions() {
        assert_eq!(call(Value::Bool(true), "toNumber", &[]).unwrap(), Value::from(1.0));
        assert_eq!(call(Value::Bool(false), "toString", &[]).unwrap(), Value::from("false"));
        assert_eq!(call(Value::Bool(false), "not", &[]).unwrap(), Value::Bool(true));
    }
}
