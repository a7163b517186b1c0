//! Criterion benchmarks for topic parsing and pattern matching.
//!
//! Run with:
//! ```bash
//! cargo bench --package lf-core --bench topic_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lf_core::{Topic, TopicPattern};

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_parse");
    for raw in ["line1.temp", "machine/line3/press2/status", "a.b.c.d.e.f.g.h.i.j"] {
        group.bench_with_input(BenchmarkId::from_parameter(raw), raw, |b, raw| {
            b.iter(|| Topic::parse(black_box(raw)))
        });
    }
    group.finish();
}

fn bench_match(c: &mut Criterion) {
    let topic = Topic::parse("machine.line3.press2.status").expect("valid topic");
    let mut group = c.benchmark_group("pattern_match");
    for raw in ["*", "machine.*", "machine.line3.*", "machine.line3.press2.status", "line1.*"] {
        let pattern = TopicPattern::parse(raw).expect("valid pattern");
        group.bench_with_input(BenchmarkId::from_parameter(raw), &pattern, |b, p| {
            b.iter(|| p.matches(black_box(&topic)))
        });
    }
    group.bench_function("proper_prefixes", |b| {
        b.iter(|| black_box(&topic).proper_prefixes().count())
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_match);
criterion_main!(benches);
