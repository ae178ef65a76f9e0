use std::fmt;

/// A point-in-time snapshot of the bookkeeping of a [`Pool`][crate::Pool].
///
/// These numbers are diagnostic only. They do not affect allocation behavior.
///
/// # Examples
///
/// ```
/// use blt_pool::{Pool, PoolKind};
///
/// let mut pool = Pool::new(PoolKind::VariableSize);
/// _ = pool.allocate(100);
///
/// let stats = pool.stats();
/// assert_eq!(stats.chunk_count, 1);
/// assert_eq!(stats.wasted_bytes, 0);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Number of chunks obtained from the backing allocator, including dedicated chunks
    /// that hold a single oversized item.
    pub chunk_count: usize,

    /// Total payload bytes of all chunks obtained from the backing allocator.
    pub reserved_bytes: usize,

    /// Unused bytes remaining at the tail of the chunk that items are currently carved from.
    pub bytes_left: usize,

    /// Tail bytes that were abandoned because a request did not fit into them.
    ///
    /// Always zero for fixed-size pools, whose chunks hold a whole number of items.
    pub wasted_bytes: usize,

    /// Number of freed items waiting on the reuse list.
    ///
    /// Always zero for variable-size and string pools, which never reuse items.
    pub free_items: usize,

    /// Payload size of the most recently grown chunk, if any chunk exists.
    pub head_chunk_size: Option<usize>,
}

impl fmt::Display for PoolStats {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks, {} bytes reserved, {} bytes left, {} bytes wasted, {} free items",
            self.chunk_count,
            self.reserved_bytes,
            self.bytes_left,
            self.wasted_bytes,
            self.free_items
        )
    }
}
