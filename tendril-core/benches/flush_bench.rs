//! Benchmarks for notification and flush throughput
//!
//! Run with: cargo bench -p tendril-core --bench flush_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::hint::black_box;
use std::rc::Rc;
use tendril_core::{Computation, ComputationOptions, Getter, Object, ReactiveGraph, Value};

/// An observed state object with one property per watcher.
fn setup(watchers: usize) -> (ReactiveGraph, Object, Vec<Rc<Computation>>) {
    let graph = ReactiveGraph::new();
    let state = Value::from(json!({}));
    let object = state.as_object().cloned().unwrap_or_default();
    for i in 0..watchers {
        object.set(format!("k{i}"), i);
    }
    graph.observe(&state);

    let computations = (0..watchers)
        .map(|i| {
            let o = object.clone();
            let key = format!("k{i}");
            graph
                .computation(
                    Getter::new(move || Ok(o.get(&key))),
                    None,
                    ComputationOptions::default(),
                )
                .unwrap()
        })
        .collect();
    (graph, object, computations)
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush/independent");

    for watchers in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(watchers as u64));
        group.bench_with_input(
            BenchmarkId::new("write_then_tick", watchers),
            &watchers,
            |b, &watchers| {
                let (graph, object, _computations) = setup(watchers);
                let mut round = 0usize;
                b.iter(|| {
                    round += 1;
                    for i in 0..watchers {
                        object.set(format!("k{i}"), round + i);
                    }
                    black_box(graph.tick())
                })
            },
        );
    }

    group.finish();
}

fn bench_shared_dependency(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush/shared");

    for watchers in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(watchers as u64));
        group.bench_with_input(
            BenchmarkId::new("one_write_many_readers", watchers),
            &watchers,
            |b, &watchers| {
                let graph = ReactiveGraph::new();
                let state = Value::from(json!({ "shared": 0 }));
                graph.observe(&state);
                let object = state.as_object().cloned().unwrap_or_default();
                let _computations: Vec<_> = (0..watchers)
                    .map(|_| {
                        let o = object.clone();
                        graph
                            .computation(
                                Getter::new(move || Ok(o.get("shared"))),
                                None,
                                ComputationOptions::default(),
                            )
                            .unwrap()
                    })
                    .collect();

                let mut round = 0usize;
                b.iter(|| {
                    round += 1;
                    object.set("shared", round);
                    black_box(graph.tick())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_flush, bench_shared_dependency);
criterion_main!(benches);
