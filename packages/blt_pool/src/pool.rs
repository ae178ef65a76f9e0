use std::alloc::{GlobalAlloc, System, handle_alloc_error};
use std::ptr::NonNull;

use crate::chain::ChunkChain;
use crate::{CarvingStrategy, Error, FixedStrategy, PoolBuilder, PoolKind, PoolStats, Result};

/// The allocation strategy bound to a pool at creation.
#[derive(Debug)]
#[allow(
    variant_size_differences,
    reason = "one strategy per pool, never stored in bulk, so boxing would only add indirection"
)]
enum Strategy {
    Fixed(FixedStrategy),
    Carving(CarvingStrategy),
}

/// A pool of items carved from large chunks of memory, all released at once when the
/// pool is destroyed.
///
/// The [kind][PoolKind] selected at creation determines how items are allocated:
///
/// - [`PoolKind::FixedSize`] hands out items of one size and reuses freed items.
/// - [`PoolKind::VariableSize`] and [`PoolKind::String`] hand out items of any size and never
///   reuse them. Freeing an item is a no-op.
///
/// Every item is aligned to the platform pointer width. Items are raw memory - the pool never
/// reads or drops what the caller stores in them. All items are released back to the backing
/// allocator only when the pool is dropped or [destroyed][Self::destroy], after which every
/// pointer obtained from the pool is dangling.
///
/// # Examples
///
/// ```
/// use blt_pool::{Pool, PoolKind};
///
/// let mut pool = Pool::new(PoolKind::FixedSize);
///
/// // The first chunk holds one item, the second chunk holds two.
/// let first = pool.allocate(16);
/// let second = pool.allocate(16);
/// let third = pool.allocate(16);
/// assert_ne!(first, second);
/// assert_ne!(second, third);
///
/// // SAFETY: The item came from this pool and we no longer use it.
/// unsafe { pool.free(first) };
///
/// // Freed items are reused once the current chunk is exhausted.
/// let fourth = pool.allocate(16);
/// assert_eq!(fourth, first);
///
/// pool.destroy();
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if its backing allocator is, but not thread-safe
/// ([`Sync`]). Every operation requires exclusive access, so there is exactly one writer at a time.
#[derive(Debug)]
pub struct Pool<A: GlobalAlloc = System> {
    kind: PoolKind,
    max_chunk_size: usize,
    chain: ChunkChain<A>,
    strategy: Strategy,
}

impl Pool {
    /// Creates a pool of the given kind, with default settings and backed by the
    /// system allocator.
    ///
    /// No memory is reserved until the first item is allocated.
    #[must_use]
    pub fn new(kind: PoolKind) -> Self {
        Self::builder().kind(kind).build()
    }

    /// Creates a builder for configuring and constructing a [`Pool`].
    ///
    /// # Examples
    ///
    /// ```
    /// use blt_pool::{Pool, PoolKind};
    ///
    /// let pool = Pool::builder().kind(PoolKind::String).build();
    /// assert_eq!(pool.kind(), PoolKind::String);
    /// ```
    #[inline]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }
}

impl<A: GlobalAlloc> Pool<A> {
    #[must_use]
    pub(crate) fn new_inner(kind: PoolKind, max_chunk_size: usize, allocator: A) -> Self {
        let strategy = match kind {
            PoolKind::FixedSize => Strategy::Fixed(FixedStrategy::default()),
            PoolKind::String | PoolKind::VariableSize => {
                Strategy::Carving(CarvingStrategy::default())
            }
        };

        tracing::debug!(?kind, max_chunk_size, "created pool");

        Self {
            kind,
            max_chunk_size,
            chain: ChunkChain::new(allocator),
            strategy,
        }
    }

    /// Returns the kind of pool, fixed when the pool was created.
    #[must_use]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Returns the maximum chunk size in bytes.
    #[must_use]
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Returns the item size of a fixed-size pool, established by its first allocation.
    ///
    /// Returns `None` for a fixed-size pool that has not allocated yet, and always for
    /// variable-size and string pools.
    #[must_use]
    pub fn item_size(&self) -> Option<usize> {
        match &self.strategy {
            Strategy::Fixed(fixed) => fixed.item_size(),
            Strategy::Carving(_) => None,
        }
    }

    /// Returns the number of unused bytes at the tail of the chunk items are carved from.
    #[must_use]
    pub fn bytes_left(&self) -> usize {
        match &self.strategy {
            Strategy::Fixed(fixed) => fixed.bytes_left(),
            Strategy::Carving(carving) => carving.bytes_left(),
        }
    }

    /// Returns a snapshot of the pool's bookkeeping.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (wasted_bytes, free_items) = match &self.strategy {
            Strategy::Fixed(fixed) => (0, fixed.free_count()),
            Strategy::Carving(carving) => (carving.wasted_bytes(), 0),
        };

        PoolStats {
            chunk_count: self.chain.len(),
            reserved_bytes: self.chain.reserved_bytes(),
            bytes_left: self.bytes_left(),
            wasted_bytes,
            free_items,
            head_chunk_size: self.chain.head_len(),
        }
    }

    /// Allocates an item of `size` bytes, aligned to the platform pointer width.
    ///
    /// The memory is uninitialized. It remains valid until the pool is dropped or destroyed or,
    /// for fixed-size pools, until the item is [freed][Self::free].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the backing allocator cannot provide a new chunk,
    /// and [`Error::InvalidSize`] if `size` is too large to be allocated at all. The pool is
    /// left unchanged in either case.
    ///
    /// # Panics
    ///
    /// For fixed-size pools, panics if `size` rounded up to pointer alignment differs from the
    /// item size established by the first allocation.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        match &mut self.strategy {
            Strategy::Fixed(fixed) => fixed.allocate(&mut self.chain, size, self.max_chunk_size),
            Strategy::Carving(carving) => {
                carving.allocate(&mut self.chain, size, self.max_chunk_size)
            }
        }
    }

    /// Allocates an item of `size` bytes, aligned to the platform pointer width.
    ///
    /// This is [`try_allocate()`](Self::try_allocate) for callers that treat memory exhaustion
    /// as fatal, like the rest of the standard library does.
    ///
    /// # Panics
    ///
    /// Calls [`handle_alloc_error`] if the backing allocator cannot provide a new chunk.
    /// Panics if `size` is too large to be allocated at all or, for fixed-size pools, if it
    /// differs from the item size established by the first allocation.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        match self.try_allocate(size) {
            Ok(item) => item,
            Err(Error::AllocationFailed { layout }) => handle_alloc_error(layout),
            Err(error) => panic!("{error}"),
        }
    }

    /// Copies `value` into a new item of a string pool.
    ///
    /// The returned pointer remains valid until the pool is dropped or destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as [`try_allocate()`](Self::try_allocate).
    ///
    /// # Panics
    ///
    /// Panics if this is not a [`PoolKind::String`] pool.
    pub fn try_copy_str(&mut self, value: &str) -> Result<NonNull<str>> {
        assert_eq!(
            self.kind,
            PoolKind::String,
            "strings can only be copied into a string pool"
        );

        let len = value.len();
        let item = self.try_allocate(len)?;

        // SAFETY: The item is at least `len` bytes long, freshly allocated and therefore
        // cannot overlap the source string.
        unsafe {
            item.copy_from_nonoverlapping(NonNull::from(value.as_bytes()).cast(), len);
        }

        let bytes = NonNull::slice_from_raw_parts(item, len);

        // SAFETY: The pointer is non-null and the bytes were copied from a valid `str`.
        Ok(unsafe { NonNull::new_unchecked(bytes.as_ptr() as *mut str) })
    }

    /// Copies `value` into a new item of a string pool.
    ///
    /// # Panics
    ///
    /// Panics if this is not a [`PoolKind::String`] pool. Calls [`handle_alloc_error`] if the
    /// backing allocator cannot provide a new chunk.
    #[must_use]
    pub fn copy_str(&mut self, value: &str) -> NonNull<str> {
        match self.try_copy_str(value) {
            Ok(item) => item,
            Err(Error::AllocationFailed { layout }) => handle_alloc_error(layout),
            Err(error) => panic!("{error}"),
        }
    }

    /// Returns an item to the pool.
    ///
    /// Fixed-size pools push the item onto a reuse list, so the next allocation that does not
    /// fit into the current chunk returns it. For variable-size and string pools this does
    /// nothing; their memory is reclaimed only when the pool is destroyed.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `item` was allocated from this pool, has not been freed
    /// since, and is not accessed through any pointer after this call.
    pub unsafe fn free(&mut self, item: NonNull<u8>) {
        debug_assert!(
            self.chain.owns(item),
            "freed item {item:?} was not allocated from this pool"
        );

        match &mut self.strategy {
            // SAFETY: Forwarding the caller's guarantees.
            Strategy::Fixed(fixed) => unsafe { fixed.free(item) },
            Strategy::Carving(_) => {}
        }
    }

    /// Releases every chunk and the pool itself.
    ///
    /// This is equivalent to dropping the pool. No destructors run for what callers stored in
    /// the items, and every pointer obtained from the pool is dangling afterwards.
    pub fn destroy(mut self) {
        self.chain.teardown();
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any, const_assert};

    use super::*;
    use crate::chain::WORD;
    use crate::test_alloc::CountingAllocator;

    assert_impl_all!(Pool: Send);
    assert_not_impl_any!(Pool: Sync);

    // Strategies are stored inline: the enum is no larger than its biggest variant plus a tag.
    const_assert!(size_of::<Strategy>() <= size_of::<FixedStrategy>() + size_of::<usize>());

    fn counted(
        kind: PoolKind,
        max_chunk_size: usize,
    ) -> (Pool<CountingAllocator>, CountingAllocator) {
        let allocator = CountingAllocator::default();
        let pool = Pool::builder()
            .kind(kind)
            .max_chunk_size(max_chunk_size)
            .allocator(allocator.clone())
            .build();

        (pool, allocator)
    }

    #[test]
    fn new_pool_reserves_nothing() {
        for kind in [PoolKind::String, PoolKind::FixedSize, PoolKind::VariableSize] {
            let (pool, allocator) = counted(kind, 1024);

            assert_eq!(pool.stats(), PoolStats::default());
            assert_eq!(pool.item_size(), None);
            assert_eq!(allocator.allocations(), 0);
        }
    }

    #[test]
    fn items_are_pointer_aligned() {
        for kind in [PoolKind::String, PoolKind::VariableSize] {
            let mut pool = Pool::new(kind);

            for size in [1, 3, 8, 17, 100, 70_000] {
                assert_eq!(pool.allocate(size).as_ptr().addr() % WORD, 0);
            }
        }

        let mut pool = Pool::new(PoolKind::FixedSize);
        for _ in 0..100 {
            assert_eq!(pool.allocate(3).as_ptr().addr() % WORD, 0);
        }
    }

    #[test]
    fn items_are_writable() {
        let mut pool = Pool::new(PoolKind::FixedSize);

        let items = (0..50_usize)
            .map(|value| {
                let item = pool.allocate(size_of::<usize>()).cast::<usize>();
                unsafe { item.write(value) };
                item
            })
            .collect::<Vec<_>>();

        for (value, item) in (0..50_usize).zip(&items) {
            assert_eq!(unsafe { item.read() }, value);
        }
    }

    #[test]
    fn free_reuses_item_in_fixed_pool() {
        let mut pool = Pool::new(PoolKind::FixedSize);

        // Fill the one-item and two-item chunks.
        let a = pool.allocate(16);
        let b = pool.allocate(16);
        let c = pool.allocate(16);
        assert_eq!(pool.bytes_left(), 0);

        unsafe { pool.free(b) };
        assert_eq!(pool.stats().free_items, 1);

        let d = pool.allocate(16);
        assert_eq!(d, b);
        assert_ne!(d, a);
        assert_ne!(d, c);
        assert_eq!(pool.stats().chunk_count, 2);
    }

    #[test]
    fn free_is_noop_in_carving_pools() {
        for kind in [PoolKind::String, PoolKind::VariableSize] {
            let mut pool = Pool::new(kind);

            let a = pool.allocate(16);
            let before = pool.stats();

            unsafe { pool.free(a) };
            assert_eq!(pool.stats(), before);

            assert_ne!(pool.allocate(16), a);
        }
    }

    #[test]
    #[should_panic]
    fn fixed_pool_rejects_different_size() {
        let mut pool = Pool::new(PoolKind::FixedSize);

        _ = pool.allocate(16);
        _ = pool.allocate(64);
    }

    #[test]
    fn fixed_pool_reports_item_size() {
        let mut pool = Pool::new(PoolKind::FixedSize);
        _ = pool.allocate(12);

        assert_eq!(pool.item_size(), Some(12_usize.next_multiple_of(WORD)));
    }

    #[test]
    fn stats_track_chunks_and_waste() {
        let (mut pool, _allocator) = counted(PoolKind::VariableSize, 256);

        _ = pool.allocate(200);
        _ = pool.allocate(100);
        _ = pool.allocate(1000);

        let stats = pool.stats();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.reserved_bytes, 256 + 256 + 1000);
        assert_eq!(stats.bytes_left, 256 - 104);
        assert_eq!(stats.wasted_bytes, 56);
        assert_eq!(stats.head_chunk_size, Some(256));
    }

    #[test]
    fn allocation_failure_leaves_pool_usable() {
        let (mut pool, allocator) = counted(PoolKind::VariableSize, 256);

        allocator.fail_next_allocation();

        assert!(matches!(
            pool.try_allocate(8),
            Err(Error::AllocationFailed { .. })
        ));
        assert_eq!(pool.stats(), PoolStats::default());

        _ = pool.allocate(8);
        assert_eq!(pool.stats().chunk_count, 1);
    }

    #[test]
    fn failed_first_fixed_allocation_leaves_pool_unbound() {
        let (mut pool, allocator) = counted(PoolKind::FixedSize, 1024);

        allocator.fail_next_allocation();

        assert!(matches!(
            pool.try_allocate(16),
            Err(Error::AllocationFailed { .. })
        ));
        assert_eq!(pool.item_size(), None);
        assert_eq!(pool.stats(), PoolStats::default());

        _ = pool.allocate(32);
        assert_eq!(pool.item_size(), Some(32));
    }

    #[test]
    fn unrepresentable_size_is_error() {
        let mut pool = Pool::new(PoolKind::VariableSize);

        assert!(matches!(
            pool.try_allocate(usize::MAX),
            Err(Error::InvalidSize { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn allocate_panics_on_unrepresentable_size() {
        let mut pool = Pool::new(PoolKind::VariableSize);
        _ = pool.allocate(usize::MAX);
    }

    #[test]
    fn copy_str_round_trips_contents() {
        let mut pool = Pool::new(PoolKind::String);

        let hello = pool.copy_str("hello");
        let empty = pool.copy_str("");
        let world = pool.copy_str("wörld");

        unsafe {
            assert_eq!(hello.as_ref(), "hello");
            assert_eq!(empty.as_ref(), "");
            assert_eq!(world.as_ref(), "wörld");
        }
    }

    #[test]
    #[should_panic]
    fn copy_str_requires_string_pool() {
        let mut pool = Pool::new(PoolKind::VariableSize);
        _ = pool.copy_str("nope");
    }

    #[test]
    fn destroy_releases_every_chunk() {
        for kind in [PoolKind::String, PoolKind::FixedSize, PoolKind::VariableSize] {
            let (mut pool, allocator) = counted(kind, 128);

            for _ in 0..100 {
                let item = pool.allocate(24);
                if kind.reuses_freed_items() {
                    unsafe { pool.free(item) };
                }
            }

            assert!(allocator.live_chunks() > 0);

            pool.destroy();

            assert_eq!(allocator.live_chunks(), 0);
        }
    }

    #[test]
    fn drop_releases_every_chunk() {
        let (mut pool, allocator) = counted(PoolKind::FixedSize, 128);

        for _ in 0..100 {
            _ = pool.allocate(24);
        }

        drop(pool);

        assert!(allocator.allocations() > 0);
        assert_eq!(allocator.live_chunks(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn destroyed_chunks_are_poisoned() {
        let (mut pool, allocator) = counted(PoolKind::VariableSize, 64);

        let item = pool.allocate(size_of::<usize>()).cast::<usize>();
        unsafe { item.write(0x1234) };

        let big = pool.allocate(100);
        unsafe { big.write_bytes(0x55, 100) };

        pool.destroy();

        assert_eq!(allocator.deallocations(), 2);
        assert_eq!(allocator.poisoned_releases(), 2);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn freeing_foreign_pointer_panics_in_debug() {
        let mut pool = Pool::new(PoolKind::FixedSize);
        _ = pool.allocate(8);

        let mut foreign = 0_u64;
        unsafe { pool.free(NonNull::from(&mut foreign).cast()) };
    }
}
