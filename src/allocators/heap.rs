//! System heap fallback.
//!
//! Requests the pool ladder cannot serve, over-aligned cache requests and
//! exhausted cache regions all land here. Blocks from this tier are never
//! compacted.

use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::sync::atomics::{AtomicCounter, AtomicGauge};

/// Wrapper around the global allocator with byte accounting.
pub struct SystemHeap {
    /// Bytes currently allocated
    allocated_bytes: AtomicGauge,

    /// Allocations served over the heap's lifetime
    allocation_count: AtomicCounter,
}

impl SystemHeap {
    pub fn new() -> Self {
        Self {
            allocated_bytes: AtomicGauge::new(0),
            allocation_count: AtomicCounter::new(0),
        }
    }

    /// Allocate memory with the given layout.
    pub fn alloc(&self, layout: Layout, zeroed: bool) -> Option<NonNull<u8>> {
        // SAFETY: layouts built by `heap_layout` are never zero-sized.
        let ptr = unsafe {
            if zeroed {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };

        let ptr = NonNull::new(ptr)?;
        self.allocated_bytes.add(layout.size());
        self.allocation_count.increment();
        Some(ptr)
    }

    /// Release memory.
    ///
    /// # Safety
    ///
    /// `addr` must come from [`SystemHeap::alloc`] with the same layout and
    /// must not be used afterwards.
    pub unsafe fn dealloc(&self, addr: usize, layout: Layout) {
        let ptr = addr as *mut u8;

        #[cfg(feature = "debug")]
        {
            crate::debug::poison::poison_freed(ptr, layout.size());
        }

        dealloc(ptr, layout);
        self.allocated_bytes.sub(layout.size());
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.get()
    }
}

impl Default for SystemHeap {
    fn default() -> Self {
        Self::new()
    }
}
