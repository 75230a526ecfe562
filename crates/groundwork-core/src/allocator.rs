//! Pluggable allocator contract.
//!
//! Everything in this crate that owns heap memory goes through an
//! [`AllocHandle`]: a trivially-clonable value that is either the default
//! heap allocator (a pure constant, no setup cost) or a handle to a
//! caller-supplied [`Allocator`]. A `#[repr(C)]` function-pointer form,
//! [`RawAllocator`], adapts foreign allocators into the same handle.
//!
//! The contract is malloc-shaped on purpose: `deallocate` takes no size,
//! so the default implementation backs onto the platform heap
//! (`malloc`/`calloc`/`realloc`/`free`) rather than `std::alloc`, which
//! would require layout bookkeeping the C-compatible form cannot carry.
//!
//! This layer never touches the thread-local error state: it is a
//! dependency of the error layer, not a client of it.

use std::ffi::c_void;
use std::sync::Arc;

/// Memory-management capability.
///
/// All methods use raw byte pointers; a null return means failure.
/// Implementations must be thread-safe for the operations they expose and
/// must tolerate `deallocate(null)` as a no-op.
pub trait Allocator: Send + Sync {
    /// Allocate `size` bytes. Returns null on failure or when `size == 0`.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Allocate `count * element_size` zeroed bytes.
    fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8;

    /// Resize `ptr` to `new_size` bytes, preserving contents.
    ///
    /// A null `ptr` behaves like [`Allocator::allocate`]. On failure the
    /// original block is left valid and null is returned.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or originate from this allocator and not have
    /// been freed.
    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8;

    /// Free `ptr`. A null `ptr` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or originate from this allocator and not have
    /// been freed.
    unsafe fn deallocate(&self, ptr: *mut u8);
}

// ---------------------------------------------------------------------------
// Default heap allocator
// ---------------------------------------------------------------------------

/// The platform general-purpose heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return std::ptr::null_mut();
        }
        // SAFETY: malloc with a non-zero size has no preconditions.
        unsafe { libc::malloc(size).cast() }
    }

    fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        if count == 0 || element_size == 0 {
            return std::ptr::null_mut();
        }
        // SAFETY: calloc checks the count * element_size product itself.
        unsafe { libc::calloc(count, element_size).cast() }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if new_size == 0 {
            return std::ptr::null_mut();
        }
        // SAFETY: caller guarantees ptr is null or a live heap block.
        unsafe { libc::realloc(ptr.cast(), new_size).cast() }
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees ptr is null or a live heap block.
        unsafe { libc::free(ptr.cast()) }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer form
// ---------------------------------------------------------------------------

/// `allocate(size, state)`.
pub type RawAllocateFn = unsafe extern "C" fn(usize, *mut c_void) -> *mut c_void;
/// `zero_allocate(count, element_size, state)`.
pub type RawZeroAllocateFn = unsafe extern "C" fn(usize, usize, *mut c_void) -> *mut c_void;
/// `reallocate(ptr, new_size, state)`.
pub type RawReallocateFn = unsafe extern "C" fn(*mut c_void, usize, *mut c_void) -> *mut c_void;
/// `deallocate(ptr, state)`.
pub type RawDeallocateFn = unsafe extern "C" fn(*mut c_void, *mut c_void);

/// Allocator as four C function pointers plus an opaque state pointer.
///
/// This is the form that crosses language boundaries. It is **valid** iff
/// all four function pointers are present; operations through an invalid
/// raw allocator return null without touching their inputs.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAllocator {
    pub allocate: Option<RawAllocateFn>,
    pub zero_allocate: Option<RawZeroAllocateFn>,
    pub reallocate: Option<RawReallocateFn>,
    pub deallocate: Option<RawDeallocateFn>,
    /// Passed verbatim to every function pointer.
    pub state: *mut c_void,
}

impl RawAllocator {
    /// True iff all four function pointers are non-null.
    pub fn is_valid(&self) -> bool {
        self.allocate.is_some()
            && self.zero_allocate.is_some()
            && self.reallocate.is_some()
            && self.deallocate.is_some()
    }
}

// SAFETY: the contract requires raw allocators to be thread-safe for the
// operations they expose; the state pointer is owned by the foreign side.
unsafe impl Send for RawAllocator {}
unsafe impl Sync for RawAllocator {}

impl Allocator for RawAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        match self.allocate {
            // SAFETY: foreign allocate with the stored state pointer.
            Some(f) => unsafe { f(size, self.state).cast() },
            None => std::ptr::null_mut(),
        }
    }

    fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        match self.zero_allocate {
            // SAFETY: foreign zero_allocate with the stored state pointer.
            Some(f) => unsafe { f(count, element_size, self.state).cast() },
            None => std::ptr::null_mut(),
        }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        match self.reallocate {
            // SAFETY: caller guarantees ptr came from this allocator.
            Some(f) => unsafe { f(ptr.cast(), new_size, self.state).cast() },
            None => std::ptr::null_mut(),
        }
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        if let Some(f) = self.deallocate {
            // SAFETY: caller guarantees ptr came from this allocator.
            unsafe { f(ptr.cast(), self.state) }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Copyable allocator handle stored by every owning container.
///
/// The default variant is a pure value constant; no dynamic memory is
/// involved in creating or copying it. A handle copy must stay usable for
/// as long as the referenced allocator state outlives every outstanding
/// allocation, which the `Shared` variant enforces by reference counting
/// and the `Raw` variant leaves to the foreign side.
#[derive(Clone)]
pub struct AllocHandle {
    inner: HandleInner,
}

#[derive(Clone)]
enum HandleInner {
    Default,
    Raw(RawAllocator),
    Shared(Arc<dyn Allocator>),
}

impl AllocHandle {
    /// The process default allocator (platform heap).
    pub const fn default_allocator() -> Self {
        AllocHandle {
            inner: HandleInner::Default,
        }
    }

    /// Wrap a foreign function-pointer allocator.
    pub fn from_raw(raw: RawAllocator) -> Self {
        AllocHandle {
            inner: HandleInner::Raw(raw),
        }
    }

    /// Wrap a custom allocator behind a shared handle.
    pub fn custom<A: Allocator + 'static>(allocator: A) -> Self {
        AllocHandle {
            inner: HandleInner::Shared(Arc::new(allocator)),
        }
    }

    /// True unless this wraps a raw allocator with missing function
    /// pointers.
    pub fn is_valid(&self) -> bool {
        match &self.inner {
            HandleInner::Default | HandleInner::Shared(_) => true,
            HandleInner::Raw(raw) => raw.is_valid(),
        }
    }

    /// Allocate `size` bytes, null on failure.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        match &self.inner {
            HandleInner::Default => DefaultAllocator.allocate(size),
            HandleInner::Raw(raw) => {
                if !raw.is_valid() {
                    return std::ptr::null_mut();
                }
                raw.allocate(size)
            }
            HandleInner::Shared(shared) => shared.allocate(size),
        }
    }

    /// Allocate `count * element_size` zeroed bytes, null on failure.
    pub fn zero_allocate(&self, count: usize, element_size: usize) -> *mut u8 {
        match &self.inner {
            HandleInner::Default => DefaultAllocator.zero_allocate(count, element_size),
            HandleInner::Raw(raw) => {
                if !raw.is_valid() {
                    return std::ptr::null_mut();
                }
                raw.zero_allocate(count, element_size)
            }
            HandleInner::Shared(shared) => shared.zero_allocate(count, element_size),
        }
    }

    /// Resize `ptr`, preserving contents; the original block stays valid
    /// when null is returned.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or originate from this allocator and not have
    /// been freed.
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        match &self.inner {
            // SAFETY: forwarded caller contract.
            HandleInner::Default => unsafe { DefaultAllocator.reallocate(ptr, new_size) },
            HandleInner::Raw(raw) => {
                if !raw.is_valid() {
                    return std::ptr::null_mut();
                }
                // SAFETY: forwarded caller contract.
                unsafe { raw.reallocate(ptr, new_size) }
            }
            // SAFETY: forwarded caller contract.
            HandleInner::Shared(shared) => unsafe { shared.reallocate(ptr, new_size) },
        }
    }

    /// Free `ptr`; null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or originate from this allocator and not have
    /// been freed.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        match &self.inner {
            // SAFETY: forwarded caller contract.
            HandleInner::Default => unsafe { DefaultAllocator.deallocate(ptr) },
            HandleInner::Raw(raw) => {
                if !raw.is_valid() {
                    return;
                }
                // SAFETY: forwarded caller contract.
                unsafe { raw.deallocate(ptr) }
            }
            // SAFETY: forwarded caller contract.
            HandleInner::Shared(shared) => unsafe { shared.deallocate(ptr) },
        }
    }

    /// Resize `ptr`, freeing it when resizing fails.
    ///
    /// For call sites that cannot tolerate keeping a stale pointer on the
    /// failure path: on an invalid allocator `ptr` is left untouched and
    /// null is returned; otherwise a failed reallocation frees `ptr`
    /// before returning null.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or originate from this allocator and not have
    /// been freed. On a null return from a *valid* allocator, `ptr` is no
    /// longer usable.
    pub unsafe fn reallocate_or_fail(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if !self.is_valid() {
            return std::ptr::null_mut();
        }
        // SAFETY: forwarded caller contract.
        let new_ptr = unsafe { self.reallocate(ptr, new_size) };
        if new_ptr.is_null() {
            // SAFETY: reallocate failed, so ptr is still live and owned here.
            unsafe { self.deallocate(ptr) };
            return std::ptr::null_mut();
        }
        new_ptr
    }

    /// Copy `s` into an owned, nul-terminated allocation.
    ///
    /// Returns null on allocation failure. Release with
    /// [`AllocHandle::deallocate`].
    pub fn alloc_string(&self, s: &str) -> *mut u8 {
        let ptr = self.allocate(s.len() + 1);
        if ptr.is_null() {
            return ptr;
        }
        // SAFETY: ptr has s.len() + 1 writable bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), ptr, s.len());
            *ptr.add(s.len()) = 0;
        }
        ptr
    }
}

impl Default for AllocHandle {
    fn default() -> Self {
        Self::default_allocator()
    }
}

impl std::fmt::Debug for AllocHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            HandleInner::Default => f.write_str("AllocHandle::Default"),
            HandleInner::Raw(raw) => f.debug_tuple("AllocHandle::Raw").field(raw).finish(),
            HandleInner::Shared(_) => f.write_str("AllocHandle::Shared"),
        }
    }
}

/// Borrow the nul-terminated string at `ptr`.
///
/// # Safety
///
/// `ptr` must point to a live, nul-terminated allocation produced from
/// valid UTF-8 (e.g. by [`AllocHandle::alloc_string`]), and must stay live
/// for the returned lifetime.
pub(crate) unsafe fn owned_str<'a>(ptr: *const u8) -> &'a str {
    // SAFETY: caller guarantees a live nul-terminated UTF-8 string.
    unsafe {
        let cstr = std::ffi::CStr::from_ptr(ptr.cast());
        std::str::from_utf8_unchecked(cstr.to_bytes())
    }
}
