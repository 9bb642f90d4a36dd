//! Keyword pre-filter throughput.
//!
//! ```bash
//! cargo bench --bench keyword_match
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use llm_guardrail_core::keywords::KeywordEngine;
use llm_guardrail_core::model::{BlacklistEntry, RiskLevel, WhitelistEntry};

fn engine(list_size: usize) -> KeywordEngine {
    let blacklist = BlacklistEntry {
        id: "b".to_string(),
        tenant_id: "t".to_string(),
        config_set_id: None,
        name: "bench".to_string(),
        keywords: (0..list_size).map(|i| format!("forbidden-term-{i}")).collect(),
        severity: RiskLevel::HighRisk,
        active: true,
    };
    let whitelist = WhitelistEntry {
        id: "w".to_string(),
        tenant_id: "t".to_string(),
        config_set_id: None,
        name: "bench".to_string(),
        keywords: vec!["approved research context".to_string()],
        active: true,
    };
    KeywordEngine::compile(&[whitelist], &[blacklist]).expect("compile keyword engine")
}

fn bench_evaluate(c: &mut Criterion) {
    let clean = "Please summarise the quarterly report and list the three main risks. ".repeat(20);
    let dirty = format!("{clean} forbidden-term-42");

    let mut group = c.benchmark_group("keywords/evaluate");
    for size in [10usize, 1_000, 10_000] {
        let engine = engine(size);
        group.bench_with_input(BenchmarkId::new("clean", size), &clean, |b, text| {
            b.iter(|| engine.evaluate(black_box(text)))
        });
        group.bench_with_input(BenchmarkId::new("hit", size), &dirty, |b, text| {
            b.iter(|| engine.evaluate(black_box(text)))
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("keywords/compile_10k", |b| b.iter(|| engine(black_box(10_000))));
}

criterion_group!(benches, bench_evaluate, bench_compile);
criterion_main!(benches);
