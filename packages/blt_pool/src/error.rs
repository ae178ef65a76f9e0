use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when a pool reserves memory for an item.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The backing allocator could not provide a chunk. No partially initialized chunk is
    /// linked into the pool when this happens, so the pool remains usable.
    #[error("backing allocator failed to provide a chunk of {} bytes", .layout.size())]
    AllocationFailed {
        /// The layout of the chunk that could not be allocated.
        layout: Layout,
    },

    /// The requested item size cannot be represented as a valid memory layout
    /// once rounded up to pointer alignment.
    #[error("item size of {size} bytes exceeds the largest representable allocation")]
    InvalidSize {
        /// The item size requested by the caller, before alignment.
        size: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failed_mentions_chunk_size() {
        let error = Error::AllocationFailed {
            layout: Layout::from_size_align(4096, 8).unwrap(),
        };

        assert_eq!(
            error.to_string(),
            "backing allocator failed to provide a chunk of 4096 bytes"
        );
    }

    #[test]
    fn invalid_size_mentions_requested_size() {
        let error = Error::InvalidSize { size: usize::MAX };

        assert!(error.to_string().contains(&usize::MAX.to_string()));
    }
}
