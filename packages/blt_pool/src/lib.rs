//! Chunked item pools that amortize many small allocations into a few large ones.
//!
//! A [`Pool`] obtains large chunks of memory from a backing allocator and carves items out of
//! them. Chunks are never returned individually - they are all released in one pass when the
//! pool is dropped or [destroyed][Pool::destroy]. This suits data whose lifetime is bound to
//! some larger unit of work, such as one record per node of a scene graph or one buffer per
//! parsed string.
//!
//! Each pool is bound at creation to one of three [kinds][PoolKind]:
//!
//! - [`PoolKind::FixedSize`] hands out items of a single size. The first chunk holds one item
//!   and every further chunk holds twice as many as the one before, until the chunk size reaches
//!   the maximum chunk size. Freed items go on a LIFO reuse list, consulted once the current
//!   chunk is exhausted and before a new chunk is grown.
//! - [`PoolKind::VariableSize`] hands out items of any size from the tail of the current chunk.
//!   Requests of at least the maximum chunk size get a dedicated chunk without disturbing the
//!   current one. Freeing is a no-op.
//! - [`PoolKind::String`] behaves exactly like [`PoolKind::VariableSize`] and additionally
//!   offers [`Pool::copy_str()`], so string buffers need not share a pool with other data.
//!
//! Every item is aligned to the platform pointer width.
//!
//! # Examples
//!
//! ```rust
//! use blt_pool::{Pool, PoolKind};
//!
//! let mut pool = Pool::new(PoolKind::VariableSize);
//!
//! let header = pool.allocate(size_of::<[usize; 2]>()).cast::<[usize; 2]>();
//! let payload = pool.allocate(1000);
//!
//! // SAFETY: The item is large enough and aligned to the pointer width.
//! unsafe { header.write([1, 2]) };
//! // SAFETY: The item is 1000 bytes long.
//! unsafe { payload.write_bytes(0, 1000) };
//!
//! // Releases both items at once.
//! pool.destroy();
//! ```
//!
//! Strings are copied into string pools:
//!
//! ```rust
//! use blt_pool::{Pool, PoolKind};
//!
//! let mut pool = Pool::new(PoolKind::String);
//!
//! let name = pool.copy_str("tableview");
//!
//! // SAFETY: The pool is still alive, so the string is too.
//! assert_eq!(unsafe { name.as_ref() }, "tableview");
//! ```
//!
//! # Memory exhaustion
//!
//! [`Pool::try_allocate()`] reports a failure of the backing allocator as
//! [`Error::AllocationFailed`] and leaves the pool unchanged. [`Pool::allocate()`] treats the
//! same condition as fatal via [`std::alloc::handle_alloc_error`].

mod builder;
mod carving;
mod chain;
mod error;
mod fixed;
mod kind;
mod pool;
mod stats;

#[cfg(test)]
mod test_alloc;

pub use builder::*;
pub(crate) use carving::*;
pub use error::*;
pub(crate) use fixed::*;
pub use kind::*;
pub use pool::*;
pub use stats::*;
