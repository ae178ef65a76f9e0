use std::alloc::GlobalAlloc;
use std::mem;
use std::ptr::NonNull;

use crate::chain::{ChunkChain, POISON, WORD, align_item};
use crate::{Error, Result};

/// A freed item stores the link to the next freed item in its first word.
type FreeLink = Option<NonNull<u8>>;

const _: () = assert!(mem::size_of::<FreeLink>() <= WORD);

/// Hands out equal-size items, reusing freed items before growing new chunks.
///
/// Each new chunk holds twice as many items as the previous one until the chunk size reaches
/// the pool's maximum chunk size, after which every chunk has that capped size.
#[derive(Debug, Default)]
pub(crate) struct FixedStrategy {
    /// Established by the first allocation and never changed afterwards.
    item_size: Option<usize>,

    /// Unused bytes at the tail of the head chunk. Always a multiple of `item_size`.
    bytes_left: usize,

    /// Head of the intrusive stack of freed items.
    free_head: FreeLink,

    free_count: usize,

    /// The next chunk holds `1 << growth` items, subject to the chunk size cap.
    growth: u32,
}

impl FixedStrategy {
    #[must_use]
    pub(crate) fn item_size(&self) -> Option<usize> {
        self.item_size
    }

    #[must_use]
    pub(crate) fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    #[must_use]
    pub(crate) fn free_count(&self) -> usize {
        self.free_count
    }

    /// Aligns `size` and verifies it against the item size established by the first
    /// allocation, if any. The item size is only recorded once an item is handed out.
    ///
    /// # Panics
    ///
    /// Panics if `size` does not round up to the item size established by the first allocation.
    fn checked_item_size(&self, size: usize) -> Result<usize> {
        let aligned = align_item(size).ok_or(Error::InvalidSize { size })?;

        if let Some(item_size) = self.item_size {
            assert_eq!(
                aligned, item_size,
                "fixed-size pool serves {item_size}-byte items but {size} bytes were requested"
            );
        }

        Ok(aligned)
    }

    /// Largest chunk that holds a whole number of items without exceeding `max_chunk_size`,
    /// or a single item if even one item is larger than that.
    #[expect(
        clippy::integer_division,
        reason = "rounding down to whole items is the intent"
    )]
    fn chunk_size_cap(item_size: usize, max_chunk_size: usize) -> usize {
        // Cannot overflow because the result is at most max(max_chunk_size, item_size).
        (max_chunk_size / item_size).max(1).wrapping_mul(item_size)
    }

    fn next_chunk_size(&self, item_size: usize, max_chunk_size: usize) -> usize {
        let cap = Self::chunk_size_cap(item_size, max_chunk_size);

        1_usize
            .checked_shl(self.growth)
            .and_then(|items| items.checked_mul(item_size))
            .map_or(cap, |grown| grown.min(cap))
    }

    pub(crate) fn allocate<A: GlobalAlloc>(
        &mut self,
        chain: &mut ChunkChain<A>,
        size: usize,
        max_chunk_size: usize,
    ) -> Result<NonNull<u8>> {
        let item_size = self.checked_item_size(size)?;

        let item = self.take_item(chain, item_size, max_chunk_size)?;
        self.item_size = Some(item_size);

        Ok(item)
    }

    fn take_item<A: GlobalAlloc>(
        &mut self,
        chain: &mut ChunkChain<A>,
        item_size: usize,
        max_chunk_size: usize,
    ) -> Result<NonNull<u8>> {
        if self.bytes_left >= item_size {
            // Cannot underflow, guarded by the comparison above.
            self.bytes_left = self.bytes_left.wrapping_sub(item_size);
            return Ok(chain.carve_head(self.bytes_left));
        }

        if let Some(item) = self.free_head {
            // SAFETY: Every item on the free list was handed out by this strategy, is word-aligned
            // and had its first word overwritten with a link when it was freed.
            self.free_head = unsafe { item.cast::<FreeLink>().read() };
            // Cannot underflow because the list was not empty.
            self.free_count = self.free_count.wrapping_sub(1);
            return Ok(item);
        }

        let chunk_size = self.next_chunk_size(item_size, max_chunk_size);
        let chunk = chain.allocate_chunk(chunk_size)?;
        chain.push_head(chunk);

        if chunk_size < Self::chunk_size_cap(item_size, max_chunk_size) {
            // Cannot overflow because the cap is reached long before the shift would overflow.
            self.growth = self.growth.wrapping_add(1);
        }

        tracing::trace!(item_size, chunk_size, growth = self.growth, "grew fixed-size pool");

        // Cannot underflow because every chunk holds at least one item.
        self.bytes_left = chunk_size.wrapping_sub(item_size);
        Ok(chain.carve_head(self.bytes_left))
    }

    /// Pushes `item` onto the free list so the next allocation reuses it.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `item` was returned by [`allocate()`](Self::allocate)
    /// on this strategy, has not been freed since, and will not be accessed by the caller
    /// until it is handed out again.
    pub(crate) unsafe fn free(&mut self, item: NonNull<u8>) {
        debug_assert!(
            self.item_size.is_some(),
            "items can only be freed after at least one was allocated"
        );

        let Some(item_size) = self.item_size else {
            return;
        };

        if cfg!(debug_assertions) {
            // SAFETY: The caller guarantees the item is ours and no longer in use,
            // so all `item_size` bytes are ours to overwrite.
            unsafe {
                item.write_bytes(POISON, item_size);
            }
        }

        // SAFETY: Items are word-aligned and at least one word long, which is enough to hold the
        // link. The caller guarantees the item is no longer in use.
        unsafe {
            item.cast::<FreeLink>().write(self.free_head);
        }

        self.free_head = Some(item);
        // Cannot overflow because each freed item occupies distinct memory.
        self.free_count = self.free_count.wrapping_add(1);
    }
}

// SAFETY: The free list only links items inside chunks owned by the same pool, which moves
// between threads as a unit together with this strategy.
unsafe impl Send for FixedStrategy {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::System;
    use std::panic::{self, AssertUnwindSafe};

    use super::*;
    use crate::DEFAULT_MAX_CHUNK_SIZE;
    use crate::test_alloc::CountingAllocator;

    #[test]
    fn first_allocation_binds_aligned_size() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        assert_eq!(strategy.item_size(), None);

        _ = strategy.allocate(&mut chain, 13, DEFAULT_MAX_CHUNK_SIZE).unwrap();

        assert_eq!(strategy.item_size(), Some(align_item(13).unwrap()));
    }

    #[test]
    fn sizes_that_align_identically_are_accepted() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        _ = strategy.allocate(&mut chain, 13, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        _ = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
    }

    #[test]
    #[should_panic]
    fn different_size_panics() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        _ = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        _ = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE);
    }

    #[test]
    fn first_chunk_holds_one_item() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        _ = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE).unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head_len(), Some(32));
        assert_eq!(strategy.bytes_left(), 0);
    }

    #[test]
    fn items_are_carved_from_the_tail_downwards() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        // Chunks of one and two items.
        _ = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        let upper = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        let lower = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE).unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(upper.as_ptr().addr() - lower.as_ptr().addr(), 32);
        assert_eq!(strategy.bytes_left(), 0);
    }

    #[test]
    fn chunk_size_doubles_until_cap() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = FixedStrategy::default();

        // Capacity after n chunks is 2^n - 1 items; 64 items need 7 chunks when uncapped.
        for _ in 0..64 {
            _ = strategy.allocate(&mut chain, 8, 128).unwrap();
        }

        let sizes = allocator.allocation_sizes();
        assert_eq!(&sizes[..5], &[8, 16, 32, 64, 128]);
        assert!(sizes[5..].iter().all(|size| *size == 128));
    }

    #[test]
    fn cap_is_whole_number_of_items() {
        assert_eq!(FixedStrategy::chunk_size_cap(24, 100), 96);
        assert_eq!(FixedStrategy::chunk_size_cap(32, 128), 128);
        assert_eq!(FixedStrategy::chunk_size_cap(256, 128), 256);
    }

    #[test]
    fn oversized_item_gets_single_item_chunks() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = FixedStrategy::default();

        for _ in 0..3 {
            _ = strategy.allocate(&mut chain, 256, 128).unwrap();
        }

        assert_eq!(allocator.allocation_sizes(), vec![256, 256, 256]);
    }

    #[test]
    fn freed_item_is_reused_lifo() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        let a = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        let b = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        let c = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();

        // Chunks of one and two items are now full.
        assert_eq!(strategy.bytes_left(), 0);

        unsafe {
            strategy.free(a);
            strategy.free(c);
        }
        assert_eq!(strategy.free_count(), 2);

        assert_eq!(strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap(), c);
        assert_eq!(strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap(), a);
        assert_eq!(strategy.free_count(), 0);
        assert_eq!(chain.len(), 2);

        // The free list is exhausted, so the next request grows a chunk.
        let d = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_ne!(d, b);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn tail_space_is_preferred_over_free_list() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        // First chunk holds one item, second chunk holds two.
        let a = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        _ = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_eq!(strategy.bytes_left(), 16);

        unsafe { strategy.free(a) };

        let next = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_ne!(next, a);
        assert_eq!(strategy.free_count(), 1);
    }

    #[test]
    fn failed_growth_leaves_strategy_unchanged() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = FixedStrategy::default();

        _ = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();

        allocator.fail_next_allocation();
        let result = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE);
        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(chain.len(), 1);

        // Growth resumes where it stopped: the second chunk holds two items.
        _ = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_eq!(allocator.allocation_sizes(), vec![16, 32]);
    }

    #[test]
    fn failed_first_allocation_binds_no_size() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = FixedStrategy::default();

        allocator.fail_next_allocation();
        let result = strategy.allocate(&mut chain, 16, DEFAULT_MAX_CHUNK_SIZE);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(strategy.item_size(), None);
        assert_eq!(chain.len(), 0);

        // No item was ever handed out, so the pool is still free to pick its size.
        _ = strategy.allocate(&mut chain, 32, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        assert_eq!(strategy.item_size(), Some(32));
    }

    #[test]
    fn size_mismatch_leaves_earlier_items_intact() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = FixedStrategy::default();

        let item = strategy
            .allocate(&mut chain, size_of::<usize>(), DEFAULT_MAX_CHUNK_SIZE)
            .unwrap()
            .cast::<usize>();
        unsafe { item.write(7) };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            strategy.allocate(&mut chain, 64, DEFAULT_MAX_CHUNK_SIZE)
        }));
        assert!(result.is_err());

        assert_eq!(unsafe { item.read() }, 7);
        assert_eq!(strategy.item_size(), Some(align_item(size_of::<usize>()).unwrap()));

        let next = strategy
            .allocate(&mut chain, size_of::<usize>(), DEFAULT_MAX_CHUNK_SIZE)
            .unwrap();
        assert_ne!(next, item.cast::<u8>());
        assert_eq!(unsafe { item.read() }, 7);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn free_before_any_allocation_panics() {
        let mut strategy = FixedStrategy::default();
        let mut slot = 0_u64;

        unsafe { strategy.free(NonNull::from(&mut slot).cast()) };
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn free_before_any_allocation_is_ignored() {
        let mut strategy = FixedStrategy::default();
        let mut slot = 0x5A5A_usize;

        unsafe { strategy.free(NonNull::from(&mut slot).cast()) };

        assert_eq!(slot, 0x5A5A);
        assert_eq!(strategy.free_count(), 0);
        assert_eq!(strategy.item_size(), None);
    }
}
