//! Benchmarks for tieralloc.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tieralloc::{AllocConfig, AllocFlags, MaintenanceTask, PoolStrategy, TieredAlloc};

fn bench_alloc() -> TieredAlloc {
    tieralloc::suppress_diagnostics(true);
    TieredAlloc::initialize(AllocConfig::minimal().with_numa(false)).unwrap()
}

fn bench_pool_alloc(c: &mut Criterion) {
    let alloc = bench_alloc();
    let mut group = c.benchmark_group("pool_allocation");

    for size in [64usize, 1000, 4000, 60_000] {
        group.bench_with_input(BenchmarkId::new("alloc_free", size), &size, |b, &size| {
            b.iter(|| {
                let ptr = alloc.allocate(black_box(size), 16, AllocFlags::NONE);
                alloc.deallocate(black_box(ptr));
            })
        });
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("alloc_1000_then_free", |b| {
        let mut held = Vec::with_capacity(1000);
        b.iter(|| {
            for _ in 0..1000 {
                held.push(alloc.allocate_from_pool(256, PoolStrategy::NextAvailable));
            }
            for ptr in held.drain(..) {
                alloc.deallocate(ptr);
            }
        })
    });

    group.finish();
}

fn bench_heap_vs_pool(c: &mut Criterion) {
    let alloc = bench_alloc();
    let mut group = c.benchmark_group("heap_vs_pool");

    group.bench_function("tieralloc_pool_1kb", |b| {
        b.iter(|| {
            let ptr = alloc.allocate(1024, 16, AllocFlags::NONE);
            alloc.deallocate(black_box(ptr));
        })
    });

    group.bench_function("tieralloc_heap_8mb", |b| {
        b.iter(|| {
            let ptr = alloc.allocate(8 << 20, 16, AllocFlags::NONE);
            alloc.deallocate(black_box(ptr));
        })
    });

    group.bench_function("std_box_1kb", |b| {
        b.iter(|| {
            let boxed = Box::new([0u8; 1024]);
            black_box(boxed);
        })
    });

    group.finish();
}

fn bench_cache_aligned(c: &mut Criterion) {
    let alloc = bench_alloc();
    let mut group = c.benchmark_group("cache_aligned");

    for alignment in [64usize, 128, 4096] {
        group.bench_with_input(
            BenchmarkId::new("alloc_free_256", alignment),
            &alignment,
            |b, &alignment| {
                b.iter(|| {
                    let ptr = alloc.allocate_cache_aligned(256, alignment);
                    alloc.deallocate(black_box(ptr));
                })
            },
        );
    }

    group.finish();
}

fn bench_links(c: &mut Criterion) {
    let alloc = bench_alloc();
    let mut group = c.benchmark_group("links");

    group.bench_function("link_access_unlink", |b| {
        let a = alloc.allocate(128, 16, AllocFlags::NONE);
        let z = alloc.allocate(128, 16, AllocFlags::NONE);
        b.iter(|| {
            alloc.link(a, z).unwrap();
            black_box(alloc.access_link(a).unwrap());
            alloc.unlink(z).unwrap();
        });
        alloc.deallocate(a);
        alloc.deallocate(z);
    });

    group.bench_function("decay_pass_256_pairs", |b| {
        let blocks: Vec<*mut u8> = (0..512).map(|_| alloc.allocate(64, 16, AllocFlags::NONE)).collect();
        for pair in blocks.chunks_exact(2) {
            alloc.link(pair[0], pair[1]).unwrap();
        }
        b.iter(|| {
            for pair in blocks.chunks_exact(2) {
                let _ = alloc.restore_link(pair[0]);
            }
            alloc.run_maintenance(MaintenanceTask::LinkDecay);
        });
        for ptr in blocks {
            alloc.deallocate(ptr);
        }
    });

    group.finish();
}

fn bench_prefetch(c: &mut Criterion) {
    let alloc = bench_alloc();
    let mut group = c.benchmark_group("prefetch");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("record_1000_accesses_then_pass", |b| {
        let ptr = alloc.allocate_cache_aligned(64 * 1024, 64);
        b.iter(|| {
            for i in 0..1000 {
                alloc.record_access(unsafe { ptr.add((i * 64) % (64 * 1024)) });
            }
            alloc.run_maintenance(MaintenanceTask::Prefetch);
        });
        alloc.deallocate(ptr);
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pool_alloc,
    bench_heap_vs_pool,
    bench_cache_aligned,
    bench_links,
    bench_prefetch,
);

criterion_main!(benches);
