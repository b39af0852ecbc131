//! Repeated-allocation benchmarks. Adapted from the teacher crate's
//! nightly `#[bench]` harness to `criterion`, which doesn't need a
//! nightly toolchain and fits the crate's `std`-based region reservation.
//!
//! Each benchmark pre-fills the arena with unrelated allocations to a
//! target occupancy before timing the steady-state alloc/free pair, so
//! the effect of a longer free-list search under pressure is visible.

use criterion::{criterion_group, criterion_main, Criterion};
use memarena::Arena;

const REGION_SIZE: usize = 1 << 20;

fn benchmark_with_preallocation(c: &mut Criterion, label: &str, pre_allocations: usize) {
    let mut arena = Arena::init(REGION_SIZE, 8, "bench").unwrap();
    let mut held = Vec::with_capacity(pre_allocations);
    for _ in 0..pre_allocations {
        held.push(arena.alloc(8).unwrap());
    }

    c.bench_function(label, |b| {
        b.iter(|| {
            let ptr = arena.alloc(8).unwrap();
            let ptr = criterion::black_box(ptr);
            arena.free(ptr.as_ptr()).unwrap();
        })
    });

    for ptr in held {
        arena.free(ptr.as_ptr()).unwrap();
    }
}

fn no_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "no_memory_usage", 0);
}

fn low_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "low_memory_usage", 8);
}

fn medium_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "medium_memory_usage", 2000);
}

fn high_memory_usage(c: &mut Criterion) {
    benchmark_with_preallocation(c, "high_memory_usage", 8000);
}

criterion_group!(
    allocation,
    no_memory_usage,
    low_memory_usage,
    medium_memory_usage,
    high_memory_usage
);
criterion_main!(allocation);
