//! End-to-end behavior of the three pool kinds, observed through a backing allocator
//! that records every chunk it hands out.
#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    missing_docs,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use blt_pool::{DEFAULT_MAX_CHUNK_SIZE, Pool, PoolKind};

const WORD: usize = align_of::<usize>();

#[derive(Debug, Default)]
struct Ledger {
    chunk_sizes: Vec<usize>,
    released: usize,
}

#[derive(Clone, Debug, Default)]
struct RecordingAllocator {
    ledger: Arc<Mutex<Ledger>>,
}

impl RecordingAllocator {
    fn chunk_sizes(&self) -> Vec<usize> {
        self.ledger.lock().unwrap().chunk_sizes.clone()
    }

    fn outstanding(&self) -> usize {
        let ledger = self.ledger.lock().unwrap();
        ledger.chunk_sizes.len() - ledger.released
    }
}

unsafe impl GlobalAlloc for RecordingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.ledger.lock().unwrap().chunk_sizes.push(layout.size());
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.ledger.lock().unwrap().released += 1;
        unsafe { System.dealloc(ptr, layout) }
    }
}

fn recorded_pool(
    kind: PoolKind,
    max_chunk_size: usize,
) -> (Pool<RecordingAllocator>, RecordingAllocator) {
    let allocator = RecordingAllocator::default();
    let pool = Pool::builder()
        .kind(kind)
        .max_chunk_size(max_chunk_size)
        .allocator(allocator.clone())
        .build();

    (pool, allocator)
}

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr().addr()
}

#[test]
fn freed_fixed_item_is_handed_out_again() {
    let mut pool = Pool::new(PoolKind::FixedSize);

    let _first = pool.allocate(16);
    let second = pool.allocate(16);
    let _third = pool.allocate(16);

    unsafe { pool.free(second) };

    assert_eq!(pool.allocate(16), second);
}

#[test]
fn oversized_request_does_not_disturb_carving_chunk() {
    let (mut pool, allocator) = recorded_pool(PoolKind::VariableSize, 4096);

    let first = pool.allocate(8);
    let bytes_left = pool.bytes_left();

    let oversized = pool.allocate(4096);
    assert_eq!(pool.bytes_left(), bytes_left);

    let third = pool.allocate(8);
    assert_eq!(addr(first) - addr(third), 8);

    assert_ne!(addr(oversized), addr(first));
    assert_eq!(allocator.chunk_sizes(), vec![4096, 4096]);
}

#[test]
fn oversized_string_requests_are_isolated_too() {
    let (mut pool, _allocator) = recorded_pool(PoolKind::String, 64);

    let small = pool.copy_str("abc");
    let long = "x".repeat(200);
    let big = pool.copy_str(&long);
    let next = pool.copy_str("def");

    assert_eq!(addr(small.cast::<u8>()) - addr(next.cast::<u8>()), WORD);

    unsafe {
        assert_eq!(small.as_ref(), "abc");
        assert_eq!(big.as_ref(), long);
        assert_eq!(next.as_ref(), "def");
    }
}

#[test]
fn fixed_chunk_sizes_double_in_order() {
    let (mut pool, allocator) = recorded_pool(PoolKind::FixedSize, DEFAULT_MAX_CHUNK_SIZE);

    // One, two and four items per chunk: seven items cause three growth events.
    for _ in 0..7 {
        _ = pool.allocate(32);
    }

    assert_eq!(allocator.chunk_sizes(), vec![32, 64, 128]);
}

#[test]
fn fixed_chunk_size_reaches_ceiling_and_stays() {
    let (mut pool, allocator) = recorded_pool(PoolKind::FixedSize, DEFAULT_MAX_CHUNK_SIZE);

    for _ in 0..20_000 {
        _ = pool.allocate(32);
    }

    let sizes = allocator.chunk_sizes();

    let growing = sizes
        .iter()
        .take_while(|size| **size < DEFAULT_MAX_CHUNK_SIZE)
        .copied()
        .collect::<Vec<_>>();
    let expected = (0..growing.len()).map(|n| 32_usize << n).collect::<Vec<_>>();
    assert_eq!(growing, expected);

    let capped = &sizes[growing.len()..];
    assert!(capped.len() >= 2, "expected several capped chunks, got {sizes:?}");
    assert!(capped.iter().all(|size| *size == DEFAULT_MAX_CHUNK_SIZE));
}

#[test]
fn every_live_item_is_aligned_and_distinct() {
    for kind in [PoolKind::String, PoolKind::FixedSize, PoolKind::VariableSize] {
        let (mut pool, _allocator) = recorded_pool(kind, 512);
        let mut seen = HashSet::new();

        for round in 0..500_usize {
            let size = if kind == PoolKind::FixedSize {
                24
            } else {
                (round * 37) % 700
            };

            let item = pool.allocate(size);
            assert_eq!(addr(item) % WORD, 0, "{kind:?} item {round} is misaligned");
            assert!(seen.insert(addr(item)), "{kind:?} item {round} was handed out twice");
        }
    }
}

#[test]
fn live_fixed_items_never_overlap_after_reuse() {
    let mut pool = Pool::new(PoolKind::FixedSize);

    let mut live = (0..64_usize)
        .map(|value| {
            let item = pool.allocate(size_of::<usize>()).cast::<usize>();
            unsafe { item.write(value) };
            (value, item)
        })
        .collect::<Vec<_>>();

    // Free every other item, then allocate enough replacements to exhaust the current
    // chunk, drain the free list and grow a new chunk.
    let mut freed = Vec::new();
    live.retain(|(value, item)| {
        if value % 2 == 0 {
            freed.push(*item);
            false
        } else {
            true
        }
    });

    for item in &freed {
        unsafe { pool.free(item.cast()) };
    }

    for value in 100..200_usize {
        let item = pool.allocate(size_of::<usize>()).cast::<usize>();
        unsafe { item.write(value) };
        live.push((value, item));
    }

    for (value, item) in &live {
        assert_eq!(unsafe { item.read() }, *value);
    }
}

#[test]
fn destroy_returns_every_chunk() {
    for kind in [PoolKind::String, PoolKind::FixedSize, PoolKind::VariableSize] {
        let (mut pool, allocator) = recorded_pool(kind, 256);

        let mut items = Vec::new();
        for round in 0..300_usize {
            let size = if kind == PoolKind::FixedSize { 40 } else { round % 400 };
            items.push(pool.allocate(size));

            if kind == PoolKind::FixedSize && round % 3 == 0 {
                let item = items.swap_remove(0);
                unsafe { pool.free(item) };
            }
        }

        assert_eq!(allocator.outstanding(), pool.stats().chunk_count);

        pool.destroy();

        assert_eq!(allocator.outstanding(), 0, "{kind:?} pool leaked chunks");
    }
}

#[test]
fn pool_can_move_to_another_thread() {
    let mut pool = Pool::new(PoolKind::FixedSize);
    _ = pool.allocate(16);

    let stats = std::thread::spawn(move || {
        _ = pool.allocate(16);
        pool.stats()
    })
    .join()
    .unwrap();

    assert_eq!(stats.chunk_count, 2);
}
