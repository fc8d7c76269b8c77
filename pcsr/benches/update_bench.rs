//! Insert throughput benchmarks, single-threaded and through the pool.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pcsr::prelude::*;
use std::sync::Arc;

fn bench_sequential_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &count in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("single_thread", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    let graph = Pcsr::with_vertices(64);
                    for i in 0..count as u32 {
                        graph.add_edge(i % 64, 1 + i / 64, 1).unwrap();
                    }
                    graph
                });
            },
        );
    }
    group.finish();
}

fn bench_pool_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_load");
    let edges: Vec<(u32, u32)> = (0..20_000u32).map(|i| (i % 64, 1 + i / 64)).collect();
    group.throughput(Throughput::Elements(edges.len() as u64));
    for &workers in &[1usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    let graph = Arc::new(Pcsr::with_vertices(64));
                    let mut pool = WorkerPool::new(Arc::clone(&graph), workers);
                    pool.submit_bulk(edges.clone());
                    pool.start();
                    pool.stop();
                    graph
                });
            },
        );
    }
    group.finish();
}

fn bench_membership_queries(c: &mut Criterion) {
    let graph = Pcsr::with_vertices(64);
    for i in 0..50_000u32 {
        graph.add_edge(i % 64, 1 + i / 64, 1).unwrap();
    }
    let mut group = c.benchmark_group("edge_exists");
    group.bench_function("hit", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = i.wrapping_add(1);
            graph.edge_exists(i % 64, 1 + (i % 50_000) / 64)
        });
    });
    group.bench_function("miss", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = i.wrapping_add(1);
            graph.edge_exists(i % 64, 100_000 + i % 1_000)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_inserts,
    bench_pool_bulk_load,
    bench_membership_queries
);
criterion_main!(benches);
