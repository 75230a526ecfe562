//! Growable binary buffer backed by the allocator contract.
//!
//! Same `(buffer, length, capacity)` shape and the same invariants as
//! [`CharArray`](crate::types::CharArray), minus the text operations:
//! this is the container for payload bytes rather than log lines.

use std::fmt;

use crate::allocator::AllocHandle;
use crate::error::ErrorKind;
use crate::maybe_return_error;

pub struct ByteArray {
    buffer: *mut u8,
    length: usize,
    capacity: usize,
    allocator: AllocHandle,
}

impl ByteArray {
    /// A zero-initialized array; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        ByteArray {
            buffer: std::ptr::null_mut(),
            length: 0,
            capacity: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// Allocate an empty array with the given capacity.
    pub fn init(capacity: usize, allocator: &AllocHandle) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("byte array initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut array = ByteArray::zeroed();
        array.allocator = allocator.clone();
        if capacity == 0 {
            return Ok(array);
        }
        array.buffer = allocator.allocate(capacity);
        if array.buffer.is_null() {
            crate::set_error_msg!("failed to allocate memory for byte array");
            return Err(ErrorKind::BadAlloc);
        }
        array.capacity = capacity;
        Ok(array)
    }

    /// Release the buffer and return to the zero-initialized state.
    pub fn fini(&mut self) -> crate::Result {
        if !self.buffer.is_null() {
            // SAFETY: buffer came from self.allocator and is released once.
            unsafe { self.allocator.deallocate(self.buffer) };
        }
        self.buffer = std::ptr::null_mut();
        self.length = 0;
        self.capacity = 0;
        Ok(())
    }

    /// Resize the buffer to exactly `new_size` bytes.
    ///
    /// Shrinking clamps `length`. `new_size == 0` is rejected with
    /// `InvalidArgument` and leaves the array unchanged. On allocation
    /// failure the old buffer has been released and the array is left
    /// zero-initialized.
    pub fn resize(&mut self, new_size: usize) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if new_size == 0 {
            crate::set_error_msg!("cannot resize byte array to zero, use fini instead");
            return Err(ErrorKind::InvalidArgument);
        }
        if new_size == self.capacity {
            return Ok(());
        }
        // SAFETY: buffer is null or owned by self.allocator; on failure
        // reallocate_or_fail has already freed it.
        let new_buffer = unsafe { self.allocator.reallocate_or_fail(self.buffer, new_size) };
        if new_buffer.is_null() {
            self.buffer = std::ptr::null_mut();
            self.length = 0;
            self.capacity = 0;
            crate::set_error_msg!("failed to reallocate memory for byte array");
            return Err(ErrorKind::BadAlloc);
        }
        self.buffer = new_buffer;
        self.capacity = new_size;
        self.length = self.length.min(new_size);
        Ok(())
    }

    /// Append bytes, growing the buffer as needed.
    pub fn append(&mut self, bytes: &[u8]) -> crate::Result {
        if bytes.is_empty() {
            return Ok(());
        }
        let needed = self.length + bytes.len();
        if needed > self.capacity {
            let target = needed.max(self.capacity.saturating_mul(2)).max(16);
            self.resize(target)?;
        }
        // SAFETY: capacity now covers length + bytes.len().
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.buffer.add(self.length), bytes.len());
        }
        self.length = needed;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.buffer.is_null() {
            return &[];
        }
        // SAFETY: length bytes of the owned buffer are initialized.
        unsafe { std::slice::from_raw_parts(self.buffer, self.length) }
    }
}

impl Drop for ByteArray {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl fmt::Debug for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArray")
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .finish()
    }
}
