//! Growable text buffer backed by the allocator contract.
//!
//! `CharArray` is the line builder the logger uses to assemble output:
//! a `(buffer, length, capacity)` triple plus the allocator that owns the
//! buffer, with string-append operations and a [`core::fmt::Write`]
//! implementation on top.
//!
//! Invariants: `length <= capacity`, and the buffer is null exactly when
//! the capacity is zero.

use std::fmt;

use crate::allocator::AllocHandle;
use crate::error::ErrorKind;
use crate::maybe_return_error;

pub struct CharArray {
    buffer: *mut u8,
    length: usize,
    capacity: usize,
    allocator: AllocHandle,
}

impl CharArray {
    /// A zero-initialized array; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        CharArray {
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
            crate::set_error_msg!("char array initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut array = CharArray::zeroed();
        array.allocator = allocator.clone();
        if capacity == 0 {
            return Ok(array);
        }
        array.buffer = allocator.allocate(capacity);
        if array.buffer.is_null() {
            crate::set_error_msg!("failed to allocate memory for char array");
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
    /// Shrinking clamps `length` to the new capacity. `new_size == 0` is
    /// rejected with `InvalidArgument` and leaves the array unchanged. On
    /// allocation failure the old buffer has been released and the array
    /// is left zero-initialized.
    pub fn resize(&mut self, new_size: usize) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if new_size == 0 {
            crate::set_error_msg!("cannot resize char array to zero, use fini instead");
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
            crate::set_error_msg!("failed to reallocate memory for char array");
            return Err(ErrorKind::BadAlloc);
        }
        self.buffer = new_buffer;
        self.capacity = new_size;
        self.length = self.length.min(new_size);
        Ok(())
    }

    /// Append a string, growing the buffer as needed.
    pub fn append_str(&mut self, s: &str) -> crate::Result {
        if s.is_empty() {
            return Ok(());
        }
        let needed = self.length + s.len();
        if needed > self.capacity {
            let target = needed.max(self.capacity.saturating_mul(2)).max(16);
            self.resize(target)?;
        }
        // SAFETY: capacity now covers length + s.len().
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), self.buffer.add(self.length), s.len());
        }
        self.length = needed;
        Ok(())
    }

    /// Append at most `n` bytes of `s` (cut on a char boundary).
    pub fn append_strn(&mut self, s: &str, n: usize) -> crate::Result {
        if n >= s.len() {
            return self.append_str(s);
        }
        let mut end = n;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.append_str(&s[..end])
    }

    /// Discard contents, keeping the buffer.
    pub fn clear(&mut self) {
        self.length = 0;
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

    pub fn as_bytes(&self) -> &[u8] {
        if self.buffer.is_null() {
            return &[];
        }
        // SAFETY: length bytes of the owned buffer are initialized.
        unsafe { std::slice::from_raw_parts(self.buffer, self.length) }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: contents are only ever written from &str data.
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }
}

impl fmt::Write for CharArray {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s).map_err(|_| fmt::Error)
    }
}

impl Drop for CharArray {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl fmt::Debug for CharArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharArray")
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .field("contents", &self.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_array_upholds_invariants_and_finis() {
        let mut array = CharArray::zeroed();
        assert_eq!(array.len(), 0);
        assert_eq!(array.capacity(), 0);
        assert!(array.fini().is_ok());
        assert!(array.fini().is_ok());
    }

    #[test]
    fn init_append_read_back() {
        let alloc = AllocHandle::default_allocator();
        let mut array = CharArray::init(8, &alloc).unwrap();
        array.append_str("[INFO] ").unwrap();
        array.append_str("ready").unwrap();
        assert_eq!(array.as_str(), "[INFO] ready");
        assert!(array.capacity() >= array.len());
        array.fini().unwrap();
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn resize_to_zero_is_rejected_and_harmless() {
        let alloc = AllocHandle::default_allocator();
        let mut array = CharArray::init(4, &alloc).unwrap();
        array.append_str("abc").unwrap();
        assert_eq!(array.resize(0), Err(ErrorKind::InvalidArgument));
        assert_eq!(array.as_str(), "abc");
        assert_eq!(array.capacity(), 4);
        crate::error::reset_error();
    }

    #[test]
    fn shrink_clamps_length() {
        let alloc = AllocHandle::default_allocator();
        let mut array = CharArray::init(16, &alloc).unwrap();
        array.append_str("0123456789").unwrap();
        array.resize(4).unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(array.capacity(), 4);
        assert_eq!(array.as_str(), "0123");
    }

    #[test]
    fn fmt_write_integrates_with_format_args() {
        use std::fmt::Write;
        let alloc = AllocHandle::default_allocator();
        let mut array = CharArray::init(4, &alloc).unwrap();
        write!(array, "count={} ratio={:.2}", 12, 0.5).unwrap();
        assert_eq!(array.as_str(), "count=12 ratio=0.50");
    }

    #[test]
    fn append_strn_cuts_on_char_boundary() {
        let alloc = AllocHandle::default_allocator();
        let mut array = CharArray::init(8, &alloc).unwrap();
        // 'é' is two bytes; asking for 4 bytes must not split it.
        array.append_strn("abcé", 4).unwrap();
        assert_eq!(array.as_str(), "abc");
    }
}
