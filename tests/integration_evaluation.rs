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

//! End-to-end evaluation through the public engine API

use flowexpr::security::BlockedPattern;
use flowexpr::{
    EngineConfig, EnvironmentVariables, ExpressionContext, ExpressionError, SecurityConfig, Value,
    parse_template,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

mod utils;
use utils::{ctx, engine, engine_with, order};

#[test]
fn arithmetic_keeps_number_type() {
    let result = engine().evaluate("{{ 1 + 1 }}", &ctx(json!({})));
    assert!(result.is_success());
    assert_eq!(result.value(), Some(&Value::from(2.0)));
    assert_eq!(result.type_tag(), "number");

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["value"], json!(2));
    assert_eq!(body["type"], json!("number"));
}

#[test]
fn repeat_builds_long_strings() {
    let result = engine().evaluate(r#"{{ "A".repeat(1000) }}"#, &ctx(json!({})));
    let value = result.value().and_then(Value::as_str).unwrap();
    assert_eq!(value.len(), 1000);
    assert!(value.chars().all(|c| c == 'A'));
}

#[test]
fn process_is_rejected() {
    let result = engine().evaluate("{{ process }}", &ctx(json!({})));
    assert!(!result.is_success());
    assert_eq!(result.type_tag(), "security_error");
    assert_eq!(
        result.error(),
        Some(&ExpressionError::SecurityViolation {
            rule: "process_access".to_string()
        })
    );
}

#[test]
fn contexts_never_leak_between_calls() {
    let engine = engine();
    let first = engine.evaluate("{{ $json.value }}", &ctx(json!({"value": "context1"})));
    let second = engine.evaluate("{{ $json.value }}", &ctx(json!({"value": "context2"})));
    assert_eq!(first.value(), Some(&Value::from("context1")));
    assert_eq!(second.value(), Some(&Value::from("context2")));
    assert!(!second.cached);
}

#[test]
fn mixed_template_renders_text() {
    let template = "Order {{ $json.id }} for {{ $json.customer.name }}: \
                    {{ $json.lines.reduce((t, l) => t + l.qty * l.price, 0) }}";
    let result = engine().evaluate(template, &ctx(order()));
    assert_eq!(
        result.value(),
        Some(&Value::from("Order ord-1001 for Ada Lovelace: 39"))
    );
    assert_eq!(result.type_tag(), "string");
}

#[rstest]
#[case("{{ 1 + 1 }}")]
#[case("{{ foo }}")]
#[case("{{ $json.nothing.trim() }}")]
#[case("{{ eval('1') }}")]
#[case("{{ 1 + ")]
#[case("plain text")]
#[case("{{ $json.customer.name.toUpperCase() }}")]
#[case("{{ $json.id.frobnicate() }}")]
fn results_carry_exactly_one_outcome(#[case] template: &str) {
    let result = engine().evaluate(template, &ctx(order()));
    assert_ne!(result.value().is_some(), result.error().is_some());
    assert_eq!(result.is_success(), result.value().is_some());

    let body = serde_json::to_value(&result).unwrap();
    let has_value = body.get("value").is_some();
    let has_error = body.get("error").is_some();
    assert_ne!(has_value, has_error);
    assert!(body["executionTime"].is_number());
    assert!(body["type"].is_string());
}

#[rstest]
#[case("{{ foo }}", "not_defined_error")]
#[case("{{ $json.nothing.toUpperCase() }}", "null_receiver_error")]
#[case("{{ $json.id.frobnicate() }}", "unknown_method_error")]
#[case("{{ DateTime.fromISO('not a date') }}", "invalid_date_error")]
#[case("{{ $('Missing').item.json }}", "no_node_execution_data")]
#[case("{{ Function('return 1')() }}", "security_error")]
#[case("{{ require('fs') }}", "security_error")]
#[case("{{ a b }}", "parse_error")]
fn failures_are_classified(#[case] template: &str, #[case] kind: &str) {
    let result = engine().evaluate(template, &ctx(order()));
    assert_eq!(result.type_tag(), kind);
    assert!(result.error_position().is_some());
}

#[test]
fn same_expression_same_dependencies_same_value() {
    let engine = engine();
    let template = "{{ $json.lines.map(l => l.sku).join(',') }}";
    let first = engine.evaluate(template, &ctx(order()));
    let second = engine.evaluate(template, &ctx(order()));
    assert_eq!(first.value(), Some(&Value::from("A-1,B-7")));
    assert_eq!(first.value(), second.value());
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.execution_time_ms, 0.0);
}

#[test]
fn blocked_text_never_reaches_the_interpreter() {
    // Evaluating the left operand would raise a null receiver error
    let result = engine().evaluate("{{ $json.nothing.trim() || eval('1') }}", &ctx(json!({})));
    assert_eq!(
        result.error(),
        Some(&ExpressionError::SecurityViolation {
            rule: "eval".to_string()
        })
    );
}

#[test]
fn host_rules_cannot_shadow_mandatory_names() {
    let config = EngineConfig {
        security: SecurityConfig {
            blocked_patterns: vec![BlockedPattern::new("eval", "zzz_never_matches")],
            ..Default::default()
        },
        ..Default::default()
    };
    let result = engine_with(config).evaluate("{{ eval('1') }}", &ctx(json!({})));
    assert_eq!(result.type_tag(), "security_error");
}

#[rstest]
#[case::long_sum(format!("{{{{ {} }}}}", vec!["1"; 2000].join(" + ")))]
#[case::long_member_chain(format!("{{{{ $json{} }}}}", ".a".repeat(200_000)))]
#[case::huge_array(String::from("{{ Array.from({length: 1e19}) }}"))]
fn oversized_work_is_a_resource_limit(#[case] template: String) {
    let result = engine().evaluate(&template, &ctx(json!({})));
    assert_eq!(result.type_tag(), "resource_limit_error");
}

#[test]
fn blocked_patterns_survive_a_warm_cache() {
    let engine = engine();
    engine.evaluate("{{ 1 + 1 }}", &ctx(json!({})));
    for _ in 0..2 {
        let result = engine.evaluate("{{ eval('1 + 1') }}", &ctx(json!({})));
        assert_eq!(result.type_tag(), "security_error");
    }
}

#[test]
fn cache_stays_within_its_bound() {
    let engine = engine_with(EngineConfig::default().with_cache_size(3));
    for n in 0..8_i32 {
        let result = engine.evaluate(&format!("{{{{ {n} * 2 }}}}"), &ctx(json!({})));
        assert_eq!(result.value(), Some(&Value::from(f64::from(n) * 2.0)));
    }
    let stats = engine.cache_stats().unwrap();
    assert!(stats.size <= 3);
    assert_eq!(stats.capacity, 3);
}

#[test]
fn disabled_cache_reports_no_stats() {
    let engine = engine_with(EngineConfig::default().with_cache(false));
    engine.evaluate("{{ 1 }}", &ctx(json!({})));
    let second = engine.evaluate("{{ 1 }}", &ctx(json!({})));
    assert!(!second.cached);
    assert!(engine.cache_stats().is_none());
}

#[test]
fn environment_is_readable_but_not_writable() {
    let env: EnvironmentVariables = [("API_HOST", "api.example.com")].into_iter().collect();
    let context = ExpressionContext::builder().json(json!({})).env(env).build();
    let engine = engine();

    let read = engine.evaluate("https://{{ $env.API_HOST }}/v1", &context);
    assert_eq!(read.value(), Some(&Value::from("https://api.example.com/v1")));

    let write = engine.evaluate("{{ $env.API_HOST = 'evil' }}", &context);
    assert_eq!(write.type_tag(), "read_only_error");
    let again = engine.evaluate("{{ $env.API_HOST }}", &context);
    assert_eq!(again.value(), Some(&Value::from("api.example.com")));
}

#[test]
fn free_identifiers_are_limited_to_the_allow_list() {
    let config = EngineConfig::default().with_allowed_globals(["$json"]);
    let engine = engine_with(config);
    assert!(engine.evaluate("{{ $json.id }}", &ctx(order())).is_success());
    let result = engine.evaluate("{{ Math.max(1, 2) }}", &ctx(order()));
    assert_eq!(result.type_tag(), "not_defined_error");
}

#[test]
fn object_literals_inside_expressions_keep_their_braces() {
    let result = engine().evaluate(
        "{{ JSON.stringify({total: {value: 1}}) }}",
        &ctx(json!({})),
    );
    assert_eq!(result.value(), Some(&Value::from(r#"{"total":{"value":1}}"#)));
}

#[rstest]
#[case("")]
#[case("no expressions")]
#[case("{{ a }}")]
#[case("pre {{ a }} mid {{ {x: {y: 1}} }} post")]
#[case("{{a}}{{b}}")]
#[case("ünïcode {{ $json['ключ'] }} ✓")]
fn segments_reconstruct_the_source(#[case] source: &str) {
    let template = parse_template(source).unwrap();
    assert_eq!(template.reconstruct(), source);

    let mut cursor = 0;
    for segment in &template.segments {
        assert_eq!(segment.from(), cursor);
        assert!(segment.to() >= segment.from());
        cursor = segment.to();
    }
    assert_eq!(cursor, source.len());
}
