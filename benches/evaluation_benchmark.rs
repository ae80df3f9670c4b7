//! Template evaluation benchmarks
//!
//! Covers the template splitter, expression parser, and the engine with the
//! result cache on and off.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flowexpr::parser::{parse_expression_pratt, parse_template, tokenizer::Tokenizer};
use flowexpr::{EngineConfig, ExpressionContext, ExpressionEngine};
use serde_json::json;
use std::hint::black_box;

const TEST_TEMPLATES: &[(&str, &str)] = &[
    ("simple", "{{ $json.customer.name }}"),
    ("medium", "Hi {{ $json.customer.name.split(' ')[0] }}, {{ $json.lines.length }} lines"),
    (
        "complex",
        "{{ $json.lines.filter(l => l.qty > 0).map(l => l.qty * l.price).reduce((a, b) => a + b, 0).toFixed(2) }}",
    ),
];

fn context() -> ExpressionContext {
    ExpressionContext::new(json!({
        "customer": {"name": "Ada Lovelace"},
        "lines": [
            {"sku": "A-1", "qty": 2, "price": 9.5},
            {"sku": "B-7", "qty": 1, "price": 20},
            {"sku": "C-3", "qty": 0, "price": 4.25}
        ]
    }))
}

fn expression(template: &str) -> &str {
    template
        .find("{{")
        .and_then(|open| {
            let rest = &template[open + 2..];
            rest.find("}}").map(|close| &rest[..close])
        })
        .unwrap_or(template)
}

fn bench_tokenizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenizer");
    group.throughput(Throughput::Elements(1));

    for (complexity, template) in TEST_TEMPLATES {
        group.bench_with_input(
            BenchmarkId::new("tokenize", complexity),
            &expression(template),
            |b, expr| b.iter(|| black_box(Tokenizer::new(black_box(expr)).tokenize_all())),
        );
    }

    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Elements(1));

    for (complexity, template) in TEST_TEMPLATES {
        group.bench_with_input(
            BenchmarkId::new("template", complexity),
            template,
            |b, template| b.iter(|| black_box(parse_template(black_box(template)))),
        );
        group.bench_with_input(
            BenchmarkId::new("expression", complexity),
            &expression(template),
            |b, expr| b.iter(|| black_box(parse_expression_pratt(black_box(expr)))),
        );
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));

    let ctx = context();
    let cached = ExpressionEngine::new(EngineConfig::default()).expect("default configuration");
    let uncached = ExpressionEngine::new(EngineConfig::default().with_cache(false))
        .expect("cache-less configuration");

    for (complexity, template) in TEST_TEMPLATES {
        group.bench_with_input(
            BenchmarkId::new("cached", complexity),
            template,
            |b, template| b.iter(|| black_box(cached.evaluate(black_box(template), &ctx))),
        );
        group.bench_with_input(
            BenchmarkId::new("uncached", complexity),
            template,
            |b, template| b.iter(|| black_box(uncached.evaluate(black_box(template), &ctx))),
        );
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let engine = ExpressionEngine::new(EngineConfig::default()).expect("default configuration");
    let (_, template) = TEST_TEMPLATES[2];
    c.bench_function("validate_complex", |b| {
        b.iter(|| black_box(engine.validate(black_box(template), None)))
    });
}

criterion_group!(
    benches,
    bench_tokenizer,
    bench_parser,
    bench_engine,
    bench_validation
);
criterion_main!(benches);
