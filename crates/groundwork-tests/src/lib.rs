//! Allocator test doubles for exercising groundwork-core failure paths.
//!
//! Three instrumented allocators, all backed by the real heap:
//! [`CountingAllocator`] tracks the live-allocation balance (leak checks),
//! [`FailingAllocator`] starts failing after a configurable number of
//! successful allocations (error-path checks), and [`raw_heap_allocator`]
//! provides a function-pointer allocator for the foreign-adapter path.

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use groundwork_core::allocator::{Allocator, DefaultAllocator, RawAllocator};

// ---------------------------------------------------------------------------
// Counting allocator
// ---------------------------------------------------------------------------

/// Shared counters of a [`CountingAllocator`].
#[derive(Default)]
pub struct AllocCounters {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    live: AtomicI64,
}

impl AllocCounters {
    /// Total successful block acquisitions.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Total non-null frees.
    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::SeqCst)
    }

    /// Outstanding blocks; zero means every allocation was returned.
    pub fn live(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }
}

/// Heap allocator that keeps an allocation/deallocation balance.
pub struct CountingAllocator {
    counters: Arc<AllocCounters>,
}

impl CountingAllocator {
    pub fn new() -> (Self, Arc<AllocCounters>) {
        let counters = Arc::new(AllocCounters::default());
        (
            CountingAllocator {
                counters: counters.clone(),
            },
            counters,
        )
    }

    fn record_acquire(&self, ptr: *mut u8) -> *mut u8 {
        if !ptr.is_null() {
            self.counters.allocations.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_add(1, Ordering::SeqCst);
        }
        ptr
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        self.record_acquire(DefaultAllocator.allocate(size))
    }

    fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        self.record_acquire(DefaultAllocator.zero_allocate(count, element_size))
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        let new_ptr = unsafe { DefaultAllocator.reallocate(ptr, new_size) };
        if ptr.is_null() && !new_ptr.is_null() {
            // A realloc from null is an acquisition.
            self.counters.allocations.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_add(1, Ordering::SeqCst);
        }
        new_ptr
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            self.counters.deallocations.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        // SAFETY: forwarded caller contract.
        unsafe { DefaultAllocator.deallocate(ptr) }
    }
}

// ---------------------------------------------------------------------------
// Failing allocator
// ---------------------------------------------------------------------------

/// Heap allocator that starts refusing after `fail_after` acquisitions.
///
/// `reallocate` counts as an acquisition attempt too, so growth paths hit
/// the failure as well. Deallocation always works.
pub struct FailingAllocator {
    remaining: AtomicI64,
    exhausted: Arc<AtomicBool>,
}

impl FailingAllocator {
    pub fn new(fail_after: i64) -> (Self, Arc<AtomicBool>) {
        let exhausted = Arc::new(AtomicBool::new(false));
        (
            FailingAllocator {
                remaining: AtomicI64::new(fail_after),
                exhausted: exhausted.clone(),
            },
            exhausted,
        )
    }

    fn take_budget(&self) -> bool {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 0 {
            self.exhausted.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }
}

impl Allocator for FailingAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        if !self.take_budget() {
            return std::ptr::null_mut();
        }
        DefaultAllocator.allocate(size)
    }

    fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        if !self.take_budget() {
            return std::ptr::null_mut();
        }
        DefaultAllocator.zero_allocate(count, element_size)
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if !self.take_budget() {
            return std::ptr::null_mut();
        }
        // SAFETY: forwarded caller contract.
        unsafe { DefaultAllocator.reallocate(ptr, new_size) }
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { DefaultAllocator.deallocate(ptr) }
    }
}

// ---------------------------------------------------------------------------
// Raw function-pointer allocator
// ---------------------------------------------------------------------------

unsafe extern "C" fn raw_allocate(size: usize, _state: *mut c_void) -> *mut c_void {
    DefaultAllocator.allocate(size).cast()
}

unsafe extern "C" fn raw_zero_allocate(
    count: usize,
    element_size: usize,
    _state: *mut c_void,
) -> *mut c_void {
    DefaultAllocator.zero_allocate(count, element_size).cast()
}

unsafe extern "C" fn raw_reallocate(
    ptr: *mut c_void,
    new_size: usize,
    _state: *mut c_void,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { DefaultAllocator.reallocate(ptr.cast(), new_size) }.cast()
}

unsafe extern "C" fn raw_deallocate(ptr: *mut c_void, _state: *mut c_void) {
    // SAFETY: forwarded caller contract.
    unsafe { DefaultAllocator.deallocate(ptr.cast()) }
}

/// A valid function-pointer allocator over the process heap.
pub fn raw_heap_allocator() -> RawAllocator {
    RawAllocator {
        allocate: Some(raw_allocate),
        zero_allocate: Some(raw_zero_allocate),
        reallocate: Some(raw_reallocate),
        deallocate: Some(raw_deallocate),
        state: std::ptr::null_mut(),
    }
}

/// A function-pointer allocator with a missing entry point (invalid).
pub fn crippled_raw_allocator() -> RawAllocator {
    RawAllocator {
        allocate: Some(raw_allocate),
        zero_allocate: None,
        reallocate: Some(raw_reallocate),
        deallocate: Some(raw_deallocate),
        state: std::ptr::null_mut(),
    }
}
