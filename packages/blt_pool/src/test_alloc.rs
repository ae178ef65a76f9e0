//! A backing allocator for tests that records every chunk a pool obtains and releases.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::RefCell;
use std::ptr;
use std::rc::Rc;
use std::slice;

use crate::chain::POISON;

#[derive(Debug, Default)]
struct Log {
    /// Payload size of every successful allocation, in order.
    allocation_sizes: Vec<usize>,
    deallocations: usize,
    poisoned_releases: usize,
    fail_next: bool,
}

/// Wraps [`System`] and keeps a shared log of what passed through it. Clones share the log.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingAllocator {
    log: Rc<RefCell<Log>>,
}

impl CountingAllocator {
    /// Makes the next allocation request return null, as if memory were exhausted.
    pub(crate) fn fail_next_allocation(&self) {
        self.log.borrow_mut().fail_next = true;
    }

    pub(crate) fn allocations(&self) -> usize {
        self.log.borrow().allocation_sizes.len()
    }

    pub(crate) fn allocation_sizes(&self) -> Vec<usize> {
        self.log.borrow().allocation_sizes.clone()
    }

    pub(crate) fn deallocations(&self) -> usize {
        self.log.borrow().deallocations
    }

    pub(crate) fn live_chunks(&self) -> usize {
        let log = self.log.borrow();
        log.allocation_sizes.len() - log.deallocations
    }

    /// Number of released chunks whose every byte had been overwritten with the poison byte.
    pub(crate) fn poisoned_releases(&self) -> usize {
        self.log.borrow().poisoned_releases
    }
}

// SAFETY: We forward every request to the system allocator unchanged.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut log = self.log.borrow_mut();

        if log.fail_next {
            log.fail_next = false;
            return ptr::null_mut();
        }

        log.allocation_sizes.push(layout.size());

        // SAFETY: Forwarding the caller's guarantees.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut log = self.log.borrow_mut();

        // Pools only poison (and thereby initialize) chunk memory in debug builds.
        if cfg!(debug_assertions) {
            // SAFETY: The caller guarantees the memory is still allocated with this layout
            // and the pool has overwritten all of it before releasing it.
            let bytes = unsafe { slice::from_raw_parts(ptr, layout.size()) };
            if bytes.iter().all(|b| *b == POISON) {
                log.poisoned_releases += 1;
            }
        }

        log.deallocations += 1;

        // SAFETY: Forwarding the caller's guarantees.
        unsafe { System.dealloc(ptr, layout) }
    }
}
