//! Criterion benchmarks for `Bitfield` set/flush throughput.
//!
//! Run with: cargo bench --bench bitfield_benchmark
//! View HTML report: target/criterion/report/index.html

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use multicore_indexer::storage::MemoryStorage;
use multicore_indexer::Bitfield;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn rt() -> Runtime {
    Runtime::new().expect("failed to build tokio runtime")
}

/// Set a contiguous run of bits, one bitfield per run (every set touches a
/// fresh page), then flush once.
fn bench_set_then_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitfield_set_then_flush");

    for count in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let rt = rt();
            b.iter(|| {
                rt.block_on(async {
                    let mut bf = Bitfield::open(Arc::new(MemoryStorage::new())).await.unwrap();
                    for i in 0..count {
                        bf.set(black_box(i), true);
                    }
                    bf.flush().await.unwrap();
                });
            });
        });
    }

    group.finish();
}

/// Reopen a previously flushed bitfield and read every bit back.
fn bench_open_and_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitfield_open_and_scan");

    for count in [1_000u64, 10_000, 100_000] {
        let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());
        {
            let rt = rt();
            rt.block_on(async {
                let mut bf = Bitfield::open(storage.clone()).await.unwrap();
                for i in (0..count).step_by(3) {
                    bf.set(i, true);
                }
                bf.flush().await.unwrap();
            });
        }

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let rt = rt();
            b.iter(|| {
                rt.block_on(async {
                    let bf = Bitfield::open(storage.clone()).await.unwrap();
                    let mut set_count = 0u64;
                    for i in 0..count {
                        if bf.get(black_box(i)) {
                            set_count += 1;
                        }
                    }
                    black_box(set_count);
                });
            });
        });
    }

    group.finish();
}

/// Sparse writes scattered across many pages, to measure page-allocation
/// overhead separately from within-page bit twiddling.
fn bench_sparse_scatter(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitfield_sparse_scatter");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("scatter_across_pages", |b| {
        let rt = rt();
        b.iter(|| {
            rt.block_on(async {
                let mut bf = Bitfield::open(Arc::new(MemoryStorage::new())).await.unwrap();
                for i in 0..10_000u64 {
                    // 100_000 apart keeps every write on a fresh page.
                    bf.set(black_box(i * 100_000), true);
                }
                bf.flush().await.unwrap();
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set_then_flush,
    bench_open_and_scan,
    bench_sparse_scatter
);
criterion_main!(benches);
