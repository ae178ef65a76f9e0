//! Basic benchmarks for the `blt_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use blt_pool::{Pool, PoolKind};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const ITEM_SIZE: usize = 32;
const BATCH: usize = 1000;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_basic");

    group.bench_function("fixed_allocate_batch", |b| {
        b.iter(|| {
            let mut pool = Pool::new(PoolKind::FixedSize);

            for _ in 0..BATCH {
                _ = black_box(pool.allocate(ITEM_SIZE));
            }

            pool.destroy();
        });
    });

    group.bench_function("fixed_free_reuse", |b| {
        let mut pool = Pool::new(PoolKind::FixedSize);

        // Exhaust the tail of the first chunks so that reuse comes from the free list.
        _ = pool.allocate(ITEM_SIZE);
        let item = pool.allocate(ITEM_SIZE);
        _ = pool.allocate(ITEM_SIZE);

        b.iter(|| {
            // SAFETY: The item came from this pool and is not used while freed.
            unsafe { pool.free(item) };
            black_box(pool.allocate(ITEM_SIZE))
        });
    });

    group.bench_function("variable_allocate_batch", |b| {
        b.iter(|| {
            let mut pool = Pool::new(PoolKind::VariableSize);

            for size in (0..BATCH).map(|n| n % 200) {
                _ = black_box(pool.allocate(size));
            }

            pool.destroy();
        });
    });

    group.bench_function("string_copy_batch", |b| {
        let words = ["graph", "marker", "tableview", "bitmap", "pen"];

        b.iter(|| {
            let mut pool = Pool::new(PoolKind::String);

            for word in words.iter().cycle().take(BATCH) {
                _ = black_box(pool.copy_str(word));
            }

            pool.destroy();
        });
    });

    group.finish();
}
