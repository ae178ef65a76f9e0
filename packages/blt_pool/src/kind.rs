/// Selects the allocation strategy bound to a [`Pool`][crate::Pool] for its whole lifetime.
///
/// # Examples
///
/// ```
/// use blt_pool::{Pool, PoolKind};
///
/// let pool = Pool::new(PoolKind::FixedSize);
/// assert_eq!(pool.kind(), PoolKind::FixedSize);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum PoolKind {
    /// Short-lived string buffers of any length, carved from the tail of shared chunks.
    ///
    /// Behaves exactly like [`VariableSize`][Self::VariableSize]. Freeing is a no-op and memory
    /// is reclaimed only when the pool is destroyed.
    String,

    /// Items that all have the same size, established by the first allocation.
    ///
    /// Chunk size doubles with every new chunk until it reaches the maximum chunk size.
    /// Freed items are reused in LIFO order before any new chunk is grown.
    FixedSize,

    /// Items of differing sizes, carved from the tail of shared chunks.
    ///
    /// Freeing is a no-op and memory is reclaimed only when the pool is destroyed.
    VariableSize,
}

impl PoolKind {
    /// Returns `true` if items of this kind are returned to a reuse list when freed.
    #[must_use]
    pub fn reuses_freed_items(self) -> bool {
        matches!(self, Self::FixedSize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fixed_size_reuses_items() {
        assert!(PoolKind::FixedSize.reuses_freed_items());
        assert!(!PoolKind::VariableSize.reuses_freed_items());
        assert!(!PoolKind::String.reuses_freed_items());
    }
}
