use std::alloc::GlobalAlloc;
use std::ptr::NonNull;

use crate::chain::{ChunkChain, align_item};
use crate::{Error, Result};

/// Carves items of any size from the tail of the head chunk. Serves both variable-size and
/// string pools, which differ only in name.
///
/// Requests of at least the maximum chunk size get a dedicated chunk that is linked below the
/// head, so the head and its remaining tail space are unaffected by them.
///
/// Items are never reclaimed individually.
#[derive(Debug, Default)]
pub(crate) struct CarvingStrategy {
    /// Unused bytes at the tail of the head chunk.
    bytes_left: usize,

    /// Tail bytes abandoned when a request did not fit and a new head chunk was grown.
    wasted_bytes: usize,
}

impl CarvingStrategy {
    #[must_use]
    pub(crate) fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    #[must_use]
    pub(crate) fn wasted_bytes(&self) -> usize {
        self.wasted_bytes
    }

    pub(crate) fn allocate<A: GlobalAlloc>(
        &mut self,
        chain: &mut ChunkChain<A>,
        size: usize,
        max_chunk_size: usize,
    ) -> Result<NonNull<u8>> {
        let size = align_item(size).ok_or(Error::InvalidSize { size })?;

        if size >= max_chunk_size {
            let chunk = chain.allocate_chunk(size)?;
            let item = chunk.base();
            chain.splice_below_head(chunk);
            return Ok(item);
        }

        if self.bytes_left < size {
            // Allocate before touching any state, so a failure leaves the strategy as it was.
            let chunk = chain.allocate_chunk(max_chunk_size)?;
            chain.push_head(chunk);

            // Cannot overflow because that would imply the waste exceeds virtual memory.
            self.wasted_bytes = self.wasted_bytes.wrapping_add(self.bytes_left);
            self.bytes_left = max_chunk_size;
        }

        // Cannot underflow, we ensured there is enough space above.
        self.bytes_left = self.bytes_left.wrapping_sub(size);
        Ok(chain.carve_head(self.bytes_left))
    }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::System;

    use super::*;
    use crate::chain::WORD;
    use crate::test_alloc::CountingAllocator;

    const MAX: usize = 256;

    #[test]
    fn first_request_grows_max_size_chunk() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = CarvingStrategy::default();

        _ = strategy.allocate(&mut chain, 24, MAX).unwrap();

        assert_eq!(allocator.allocation_sizes(), vec![MAX]);
        assert_eq!(strategy.bytes_left(), MAX - 24);
    }

    #[test]
    fn sizes_are_rounded_up_to_words() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = CarvingStrategy::default();

        let a = strategy.allocate(&mut chain, 1, MAX).unwrap();
        let b = strategy.allocate(&mut chain, 0, MAX).unwrap();
        let c = strategy.allocate(&mut chain, WORD + 1, MAX).unwrap();

        assert_eq!(a.as_ptr().addr() - b.as_ptr().addr(), WORD);
        assert_eq!(b.as_ptr().addr() - c.as_ptr().addr(), WORD * 2);
        assert_eq!(c.as_ptr().addr() % WORD, 0);
    }

    #[test]
    fn items_are_carved_downwards_without_overlap() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = CarvingStrategy::default();

        let sizes = [8, 40, 16, 64, 8];
        let items = sizes
            .iter()
            .map(|size| strategy.allocate(&mut chain, *size, MAX).unwrap())
            .collect::<Vec<_>>();

        for (pair, lower_size) in items.windows(2).zip(&sizes[1..]) {
            let [upper, lower] = pair else {
                unreachable!("windows(2) always yields pairs");
            };
            assert_eq!(upper.as_ptr().addr() - lower.as_ptr().addr(), *lower_size);
        }

        assert_eq!(chain.len(), 1);
        assert_eq!(strategy.bytes_left(), MAX - sizes.iter().sum::<usize>());
    }

    #[test]
    fn tail_that_does_not_fit_is_wasted() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = CarvingStrategy::default();

        _ = strategy.allocate(&mut chain, 200, MAX).unwrap();
        assert_eq!(strategy.bytes_left(), 56);

        _ = strategy.allocate(&mut chain, 64, MAX).unwrap();

        assert_eq!(strategy.wasted_bytes(), 56);
        assert_eq!(strategy.bytes_left(), MAX - 64);
        assert_eq!(allocator.allocation_sizes(), vec![MAX, MAX]);
    }

    #[test]
    fn oversized_request_gets_dedicated_chunk() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = CarvingStrategy::default();

        let small = strategy.allocate(&mut chain, 8, MAX).unwrap();
        let bytes_left = strategy.bytes_left();

        let big = strategy.allocate(&mut chain, MAX, MAX).unwrap();
        assert_eq!(strategy.bytes_left(), bytes_left);
        assert_eq!(strategy.wasted_bytes(), 0);

        let next = strategy.allocate(&mut chain, 8, MAX).unwrap();
        assert_eq!(small.as_ptr().addr() - next.as_ptr().addr(), 8);

        assert!(chain.owns(big));
        assert_eq!(allocator.allocation_sizes(), vec![MAX, MAX]);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn oversized_request_on_empty_chain() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = CarvingStrategy::default();

        _ = strategy.allocate(&mut chain, 1000, MAX).unwrap();
        assert_eq!(strategy.bytes_left(), 0);

        // The dedicated chunk is never carved from; a regular chunk is grown instead.
        _ = strategy.allocate(&mut chain, 8, MAX).unwrap();
        assert_eq!(strategy.bytes_left(), MAX - 8);
        assert_eq!(
            allocator.allocation_sizes(),
            vec![1000_usize.next_multiple_of(WORD), MAX]
        );
    }

    #[test]
    fn failed_growth_leaves_strategy_unchanged() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());
        let mut strategy = CarvingStrategy::default();

        _ = strategy.allocate(&mut chain, 200, MAX).unwrap();

        allocator.fail_next_allocation();
        let result = strategy.allocate(&mut chain, 64, MAX);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(strategy.bytes_left(), 56);
        assert_eq!(strategy.wasted_bytes(), 0);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn unrepresentable_size_is_error() {
        let mut chain = ChunkChain::new(System);
        let mut strategy = CarvingStrategy::default();

        let result = strategy.allocate(&mut chain, usize::MAX, MAX);
        assert!(matches!(result, Err(Error::InvalidSize { size: usize::MAX })));
        assert_eq!(chain.len(), 0);
    }
}
