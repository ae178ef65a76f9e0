use std::alloc::{GlobalAlloc, System};

use crate::chain::{WORD, align_item};
use crate::{Pool, PoolKind};

/// Payload size of every chunk grown by variable-size and string pools, and the largest chunk
/// size a fixed-size pool grows to, unless configured otherwise via
/// [`PoolBuilder::max_chunk_size()`].
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1 << 16;

/// Builder for creating an instance of [`Pool`].
///
/// The pool kind is mandatory, whereas other settings are optional.
/// Use [`Pool::new()`] if you do not need to customize anything beyond the kind.
///
/// # Examples
///
/// ```
/// use blt_pool::{Pool, PoolKind};
///
/// let pool = Pool::builder()
///     .kind(PoolKind::VariableSize)
///     .max_chunk_size(4096)
///     .build();
///
/// assert_eq!(pool.max_chunk_size(), 4096);
/// ```
///
/// Backing the pool with a custom allocator:
///
/// ```
/// use std::alloc::System;
///
/// use blt_pool::{Pool, PoolKind};
///
/// let pool = Pool::builder()
///     .kind(PoolKind::FixedSize)
///     .allocator(System)
///     .build();
/// ```
#[derive(Debug)]
#[must_use]
pub struct PoolBuilder<A: GlobalAlloc = System> {
    kind: Option<PoolKind>,
    max_chunk_size: usize,
    allocator: A,
}

impl PoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            kind: None,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            allocator: System,
        }
    }
}

impl<A: GlobalAlloc> PoolBuilder<A> {
    /// Sets the allocation strategy of the pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use blt_pool::{Pool, PoolKind};
    ///
    /// let pool = Pool::builder().kind(PoolKind::String).build();
    /// assert_eq!(pool.kind(), PoolKind::String);
    /// ```
    pub fn kind(mut self, kind: PoolKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the maximum chunk size in bytes, rounded up to pointer alignment.
    ///
    /// Variable-size and string pools grow chunks of exactly this size and give requests of at
    /// least this size a dedicated chunk. Fixed-size pools double their chunk size until
    /// reaching this limit.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero or too large to be a valid allocation size.
    pub fn max_chunk_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "pool chunks must have a non-zero size");

        self.max_chunk_size =
            align_item(bytes).expect("maximum chunk size must be a valid allocation size");
        self
    }

    /// Sets the allocator that chunks are obtained from. By default, this is [`System`].
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> PoolBuilder<B> {
        PoolBuilder {
            kind: self.kind,
            max_chunk_size: self.max_chunk_size,
            allocator,
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no kind has been set using [`kind()`](Self::kind).
    #[must_use]
    pub fn build(self) -> Pool<A> {
        let kind = self
            .kind
            .expect("pool kind must be set using .kind() before calling .build()");

        debug_assert!(self.max_chunk_size >= WORD);

        Pool::new_inner(kind, self.max_chunk_size, self.allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let pool = PoolBuilder::new().kind(PoolKind::FixedSize).build();

        assert_eq!(pool.kind(), PoolKind::FixedSize);
        assert_eq!(pool.max_chunk_size(), DEFAULT_MAX_CHUNK_SIZE);
    }

    #[test]
    fn max_chunk_size_is_word_aligned() {
        let pool = PoolBuilder::new()
            .kind(PoolKind::VariableSize)
            .max_chunk_size(1)
            .build();

        assert_eq!(pool.max_chunk_size(), WORD);
    }

    #[test]
    fn allocator_keeps_other_settings() {
        let pool = PoolBuilder::new()
            .kind(PoolKind::String)
            .max_chunk_size(512)
            .allocator(System)
            .build();

        assert_eq!(pool.kind(), PoolKind::String);
        assert_eq!(pool.max_chunk_size(), 512);
    }

    #[test]
    #[should_panic]
    fn build_without_kind_panics() {
        drop(PoolBuilder::new().build());
    }

    #[test]
    #[should_panic]
    fn zero_max_chunk_size_panics() {
        _ = PoolBuilder::new().max_chunk_size(0);
    }

    #[test]
    #[should_panic]
    fn huge_max_chunk_size_panics() {
        _ = PoolBuilder::new().max_chunk_size(usize::MAX);
    }
}
