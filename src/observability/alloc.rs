//! Counting global allocator.
//!
//! Wraps the system allocator and keeps two process-wide counters: bytes
//! currently allocated and bytes allocated since start. The binary installs
//! it with `#[global_allocator]`; when it is not installed both counters
//! read zero.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);

/// System allocator that tracks heap usage.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingAllocator;

impl CountingAllocator {
    pub const fn new() -> Self {
        Self
    }
}

/// Snapshot of the allocator counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    /// Bytes currently allocated.
    pub allocated: u64,
    /// Bytes allocated since process start, never decreasing.
    pub total_allocated: u64,
}

/// Read the allocator counters.
pub fn heap_usage() -> HeapUsage {
    HeapUsage {
        allocated: ALLOCATED.load(Ordering::Relaxed),
        total_allocated: TOTAL_ALLOCATED.load(Ordering::Relaxed),
    }
}

fn on_alloc(size: usize) {
    ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
    TOTAL_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
}

fn on_dealloc(size: usize) {
    ALLOCATED.fetch_sub(size as u64, Ordering::Relaxed);
}

/// A resize counts only its growth towards the cumulative total.
fn on_realloc(old_size: usize, new_size: usize) {
    if new_size >= old_size {
        let grown = (new_size - old_size) as u64;
        ALLOCATED.fetch_add(grown, Ordering::Relaxed);
        TOTAL_ALLOCATED.fetch_add(grown, Ordering::Relaxed);
    } else {
        ALLOCATED.fetch_sub((old_size - new_size) as u64, Ordering::Relaxed);
    }
}

// SAFETY: every call is forwarded to `System` with the caller's layout; the
// counters are plain atomics and never allocate.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        on_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            on_realloc(layout.size(), new_size);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // The counters are process-wide; tests touching them run one at a time.
    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_allocator_counts_through_direct_calls() {
        let _serial = SERIAL.lock();
        let allocator = CountingAllocator::new();
        let layout = Layout::from_size_align(4096, 8).unwrap();
        let before = heap_usage();

        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            let during = heap_usage();
            assert!(during.total_allocated >= before.total_allocated + 4096);
            allocator.dealloc(ptr, layout);
        }

        let after = heap_usage();
        assert!(after.total_allocated >= before.total_allocated + 4096);
    }

    #[test]
    fn test_realloc_counts_only_growth() {
        let _serial = SERIAL.lock();
        let allocator = CountingAllocator::new();
        let layout = Layout::from_size_align(1024, 8).unwrap();

        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            let before = heap_usage();

            let grown = allocator.realloc(ptr, layout, 1536);
            assert!(!grown.is_null());
            let after_grow = heap_usage();
            assert_eq!(after_grow.total_allocated - before.total_allocated, 512);
            assert_eq!(after_grow.allocated - before.allocated, 512);

            let grown_layout = Layout::from_size_align(1536, 8).unwrap();
            let shrunk = allocator.realloc(grown, grown_layout, 256);
            assert!(!shrunk.is_null());
            let after_shrink = heap_usage();
            assert_eq!(after_shrink.total_allocated, after_grow.total_allocated);
            assert_eq!(after_grow.allocated - after_shrink.allocated, 1280);

            allocator.dealloc(shrunk, Layout::from_size_align(256, 8).unwrap());
        }
    }
}
