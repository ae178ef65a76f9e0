use std::alloc::{GlobalAlloc, Layout};
use std::mem;
use std::ptr::NonNull;

use crate::{Error, Result};

/// Every item handed out by a pool is aligned to this many bytes and
/// occupies a multiple of this many bytes.
pub(crate) const WORD: usize = mem::align_of::<usize>();

/// Freed chunk and item memory is overwritten with this byte in debug builds,
/// so that reads through stale pointers produce recognizable garbage.
pub(crate) const POISON: u8 = 0xDD;

/// Rounds `size` up to a whole number of words. Zero-sized requests still occupy one word,
/// which guarantees each item has a unique address and room for a free list link.
#[must_use]
pub(crate) fn align_item(size: usize) -> Option<usize> {
    let aligned = size.checked_add(WORD.wrapping_sub(1))? & !WORD.wrapping_sub(1);

    // The result must also be a valid layout size.
    if aligned > isize::MAX.unsigned_abs() {
        return None;
    }

    Some(aligned.max(WORD))
}

/// One raw allocation owned by a [`ChunkChain`].
#[derive(Debug)]
pub(crate) struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
}

impl Chunk {
    /// Returns the address of the first payload byte.
    #[must_use]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Returns the number of payload bytes in the chunk.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr().addr();
        // Cannot overflow because the chunk exists in the address space.
        let end = start.wrapping_add(self.len());
        (start..end).contains(&ptr.as_ptr().addr())
    }
}

/// The chain of every chunk a pool has ever obtained from its backing allocator.
///
/// Chunks are never individually released, resized or removed from the middle of the chain.
/// The whole chain is released in one pass by [`teardown()`](Self::teardown) or when dropped.
///
/// The most recently pushed chunk is the head. Pools carve items from the tail end of the head.
#[derive(Debug)]
pub(crate) struct ChunkChain<A: GlobalAlloc> {
    allocator: A,

    /// Most recent last, so the head is `chunks.last()`.
    chunks: Vec<Chunk>,

    /// Sum of the payload sizes of every chunk currently in the chain.
    reserved_bytes: usize,
}

impl<A: GlobalAlloc> ChunkChain<A> {
    #[must_use]
    pub(crate) fn new(allocator: A) -> Self {
        Self {
            allocator,
            chunks: Vec::new(),
            reserved_bytes: 0,
        }
    }

    /// Obtains a new chunk with `bytes` payload bytes from the backing allocator.
    ///
    /// The chunk is not yet part of the chain - the caller decides where to link it. Room for
    /// linking it is reserved up front, so linking the returned chunk never allocates.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    pub(crate) fn allocate_chunk(&mut self, bytes: usize) -> Result<Chunk> {
        assert!(bytes > 0, "pool chunks must have a non-zero size");

        let Ok(layout) = Layout::from_size_align(bytes, WORD) else {
            return Err(Error::InvalidSize { size: bytes });
        };

        if self.chunks.try_reserve(1).is_err() {
            return Err(Error::AllocationFailed {
                layout: Layout::new::<Chunk>(),
            });
        }

        // SAFETY: The layout has a non-zero size, as asserted above.
        let ptr = unsafe { self.allocator.alloc(layout) };

        let base = NonNull::new(ptr).ok_or(Error::AllocationFailed { layout })?;

        Ok(Chunk { base, layout })
    }

    /// Links `chunk` as the new head, making it the chunk that items are carved from.
    pub(crate) fn push_head(&mut self, chunk: Chunk) {
        tracing::trace!(
            chunk_bytes = chunk.len(),
            chunk_count = self.chunks.len(),
            "pushing new head chunk"
        );

        self.account(&chunk);
        self.chunks.push(chunk);
    }

    /// Links `chunk` immediately after the head, leaving the head undisturbed.
    ///
    /// If the chain is empty, the chunk becomes the head.
    pub(crate) fn splice_below_head(&mut self, chunk: Chunk) {
        tracing::trace!(
            chunk_bytes = chunk.len(),
            chunk_count = self.chunks.len(),
            "splicing dedicated chunk below head"
        );

        self.account(&chunk);

        match self.chunks.len().checked_sub(1) {
            Some(head_index) => self.chunks.insert(head_index, chunk),
            None => self.chunks.push(chunk),
        }
    }

    fn account(&mut self, chunk: &Chunk) {
        // Cannot overflow because that would imply the chunks exceed virtual memory.
        self.reserved_bytes = self.reserved_bytes.wrapping_add(chunk.len());
    }

    /// Returns a pointer `offset` bytes into the payload of the head chunk.
    ///
    /// # Panics
    ///
    /// Panics if the chain is empty or if `offset` is not inside the head chunk.
    #[must_use]
    pub(crate) fn carve_head(&self, offset: usize) -> NonNull<u8> {
        let head = self
            .chunks
            .last()
            .expect("items can only be carved when a head chunk exists");

        assert!(
            offset < head.len(),
            "carving offset {offset} is outside the head chunk of {} bytes",
            head.len()
        );

        // SAFETY: The offset is within the head chunk's payload, as asserted above.
        unsafe { head.base().add(offset) }
    }

    /// Returns `true` if `ptr` points into the payload of any chunk in the chain.
    #[must_use]
    pub(crate) fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.chunks.iter().any(|chunk| chunk.contains(ptr))
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub(crate) fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    /// Returns the size of the most recently pushed head chunk, if any.
    #[must_use]
    pub(crate) fn head_len(&self) -> Option<usize> {
        self.chunks.last().map(Chunk::len)
    }

    /// Returns every chunk to the backing allocator, head first.
    ///
    /// Any pointer previously carved from the chain is invalid afterwards.
    /// Calling this on an empty chain does nothing.
    pub(crate) fn teardown(&mut self) {
        if self.chunks.is_empty() {
            return;
        }

        tracing::debug!(
            chunk_count = self.chunks.len(),
            reserved_bytes = self.reserved_bytes,
            "releasing pool chunks"
        );

        while let Some(chunk) = self.chunks.pop() {
            if cfg!(debug_assertions) {
                // SAFETY: The chunk payload is owned by us and nobody may access it after teardown.
                unsafe {
                    chunk.base.write_bytes(POISON, chunk.len());
                }
            }

            // SAFETY: The chunk was allocated by this allocator with this exact layout
            // and has not been released before because we just removed it from the chain.
            unsafe {
                self.allocator.dealloc(chunk.base.as_ptr(), chunk.layout);
            }
        }

        self.reserved_bytes = 0;
    }
}

impl<A: GlobalAlloc> Drop for ChunkChain<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// SAFETY: The chain exclusively owns the memory behind its chunk pointers and never shares them
// with thread-bound state. Moving the chain moves ownership of every chunk along with it.
unsafe impl<A: GlobalAlloc + Send> Send for ChunkChain<A> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::System;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::test_alloc::CountingAllocator;

    assert_impl_all!(ChunkChain<System>: Send);
    assert_not_impl_any!(ChunkChain<System>: Sync);

    #[test]
    fn align_item_rounds_up_to_word() {
        assert_eq!(align_item(0), Some(WORD));
        assert_eq!(align_item(1), Some(WORD));
        assert_eq!(align_item(WORD), Some(WORD));
        assert_eq!(align_item(WORD + 1), Some(WORD * 2));
        assert_eq!(align_item(100), Some(100_usize.div_ceil(WORD) * WORD));
    }

    #[test]
    fn align_item_rejects_unrepresentable_sizes() {
        assert_eq!(align_item(usize::MAX), None);
        assert_eq!(align_item(isize::MAX.unsigned_abs()), None);
    }

    #[test]
    fn chunks_are_word_aligned() {
        let mut chain = ChunkChain::new(System);

        for bytes in [1, 7, 8, 13, 4096] {
            let chunk = chain.allocate_chunk(bytes).unwrap();
            assert_eq!(chunk.base().as_ptr().addr() % WORD, 0);
            assert_eq!(chunk.len(), bytes);

            unsafe { System.dealloc(chunk.base.as_ptr(), chunk.layout) };
        }
    }

    #[test]
    fn teardown_releases_every_chunk() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());

        for bytes in [64, 128, 256] {
            let chunk = chain.allocate_chunk(bytes).unwrap();
            chain.push_head(chunk);
        }

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.reserved_bytes(), 448);
        assert_eq!(allocator.live_chunks(), 3);

        chain.teardown();

        assert_eq!(chain.len(), 0);
        assert_eq!(chain.reserved_bytes(), 0);
        assert_eq!(allocator.live_chunks(), 0);
        assert_eq!(allocator.deallocations(), 3);
    }

    #[test]
    fn teardown_of_empty_chain_is_noop() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());

        chain.teardown();
        chain.teardown();

        assert_eq!(allocator.deallocations(), 0);
    }

    #[test]
    fn drop_releases_every_chunk() {
        let allocator = CountingAllocator::default();

        {
            let mut chain = ChunkChain::new(allocator.clone());
            let chunk = chain.allocate_chunk(32).unwrap();
            chain.push_head(chunk);
        }

        assert_eq!(allocator.allocations(), 1);
        assert_eq!(allocator.live_chunks(), 0);
    }

    #[test]
    fn splice_keeps_head_in_place() {
        let mut chain = ChunkChain::new(System);

        let head = chain.allocate_chunk(64).unwrap();
        let head_base = head.base();
        chain.push_head(head);

        let dedicated = chain.allocate_chunk(1024).unwrap();
        let dedicated_base = dedicated.base();
        chain.splice_below_head(dedicated);

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.head_len(), Some(64));
        assert_eq!(chain.carve_head(0), head_base);
        assert!(chain.owns(dedicated_base));
    }

    #[test]
    fn splice_into_empty_chain_becomes_head() {
        let mut chain = ChunkChain::new(System);

        let dedicated = chain.allocate_chunk(1024).unwrap();
        chain.splice_below_head(dedicated);

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head_len(), Some(1024));
    }

    #[test]
    fn owns_only_payload_addresses() {
        let mut chain = ChunkChain::new(System);
        let chunk = chain.allocate_chunk(64).unwrap();
        let base = chunk.base();
        chain.push_head(chunk);

        assert!(chain.owns(base));
        assert!(chain.owns(unsafe { base.add(63) }));
        assert!(!chain.owns(unsafe { base.add(64) }));

        let outside = Box::new(0_u64);
        assert!(!chain.owns(NonNull::from(&*outside).cast()));
    }

    #[test]
    fn failed_allocation_is_reported() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());

        allocator.fail_next_allocation();

        let result = chain.allocate_chunk(64);
        assert!(matches!(result, Err(Error::AllocationFailed { layout }) if layout.size() == 64));
        assert_eq!(chain.len(), 0);
        assert_eq!(allocator.allocations(), 0);
    }

    #[test]
    fn linking_allocated_chunk_needs_no_growth() {
        let mut chain = ChunkChain::new(System);

        for bytes in [64, 128, 256, 512, 1024] {
            let chunk = chain.allocate_chunk(bytes).unwrap();
            assert!(chain.chunks.capacity() > chain.chunks.len());

            let capacity = chain.chunks.capacity();
            chain.splice_below_head(chunk);
            assert_eq!(chain.chunks.capacity(), capacity);
        }

        assert_eq!(chain.len(), 5);
    }

    #[test]
    #[should_panic]
    fn zero_sized_chunk_panics() {
        let mut chain = ChunkChain::new(System);
        drop(chain.allocate_chunk(0));
    }

    #[test]
    #[should_panic]
    fn carving_from_empty_chain_panics() {
        let chain = ChunkChain::new(System);
        _ = chain.carve_head(0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn teardown_poisons_chunks() {
        let allocator = CountingAllocator::default();
        let mut chain = ChunkChain::new(allocator.clone());

        let chunk = chain.allocate_chunk(128).unwrap();
        unsafe { chunk.base().write_bytes(0x11, 128) };
        chain.push_head(chunk);

        chain.teardown();

        assert_eq!(allocator.poisoned_releases(), 1);
    }
}
