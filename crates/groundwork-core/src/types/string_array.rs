//! Fixed-slot array of independently-owned strings.
//!
//! Each slot holds either null or a nul-terminated string owned through
//! the stored allocator; sparse arrays are expected (slots are filled as
//! results become available). Teardown frees every live slot, then the
//! slot vector itself.

use std::cmp::Ordering;
use std::fmt;

use crate::allocator::{AllocHandle, owned_str};
use crate::error::ErrorKind;
use crate::maybe_return_error;

const PTR_SIZE: usize = std::mem::size_of::<*mut u8>();

pub struct StringArray {
    data: *mut *mut u8,
    len: usize,
    allocator: AllocHandle,
}

impl StringArray {
    /// A zero-initialized array; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        StringArray {
            data: std::ptr::null_mut(),
            len: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// Allocate `len` null slots.
    pub fn init(len: usize, allocator: &AllocHandle) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("string array initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut array = StringArray::zeroed();
        array.allocator = allocator.clone();
        if len == 0 {
            return Ok(array);
        }
        array.data = allocator.zero_allocate(len, PTR_SIZE).cast();
        if array.data.is_null() {
            crate::set_error_msg!("failed to allocate memory for string array");
            return Err(ErrorKind::BadAlloc);
        }
        array.len = len;
        Ok(array)
    }

    /// Free every owned string, then the slot vector.
    pub fn fini(&mut self) -> crate::Result {
        if self.data.is_null() {
            self.len = 0;
            return Ok(());
        }
        for i in 0..self.len {
            // SAFETY: slot i is in bounds; entries are null or owned strings.
            unsafe {
                let entry = *self.data.add(i);
                self.allocator.deallocate(entry);
            }
        }
        // SAFETY: the slot vector came from self.allocator.
        unsafe { self.allocator.deallocate(self.data.cast()) };
        self.data = std::ptr::null_mut();
        self.len = 0;
        Ok(())
    }

    /// Number of slots (filled or not).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The string in slot `index`, if the slot is in range and filled.
    pub fn get(&self, index: usize) -> Option<&str> {
        if index >= self.len {
            return None;
        }
        // SAFETY: index is in bounds.
        let entry = unsafe { *self.data.add(index) };
        if entry.is_null() {
            return None;
        }
        // SAFETY: non-null entries are live nul-terminated UTF-8 strings.
        Some(unsafe { owned_str(entry) })
    }

    /// Replace slot `index`, freeing any previous owner. `None` empties
    /// the slot.
    pub fn set(&mut self, index: usize, value: Option<&str>) -> crate::Result {
        if index >= self.len {
            crate::set_error_fmt!("string array index {} out of range (len {})", index, self.len);
            return Err(ErrorKind::InvalidArgument);
        }
        let new_entry = match value {
            None => std::ptr::null_mut(),
            Some(s) => {
                let ptr = self.allocator.alloc_string(s);
                if ptr.is_null() {
                    crate::set_error_msg!("failed to allocate string array entry");
                    return Err(ErrorKind::BadAlloc);
                }
                ptr
            }
        };
        // SAFETY: index is in bounds; the old entry is null or owned.
        unsafe {
            let slot = self.data.add(index);
            self.allocator.deallocate(*slot);
            *slot = new_entry;
        }
        Ok(())
    }

    /// Resize to `new_len` slots.
    ///
    /// Shrinking frees the truncated entries; growing leaves the new
    /// slots null. Resizing to zero releases everything.
    pub fn resize(&mut self, new_len: usize) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if new_len == self.len {
            return Ok(());
        }
        if new_len == 0 {
            return self.fini();
        }
        for i in new_len..self.len {
            // SAFETY: slot i is in bounds of the current vector.
            unsafe {
                let slot = self.data.add(i);
                self.allocator.deallocate(*slot);
                *slot = std::ptr::null_mut();
            }
        }
        // SAFETY: data is null or owned by self.allocator; on failure the
        // old vector (with truncated entries already freed) stays valid.
        let new_data: *mut *mut u8 =
            unsafe { self.allocator.reallocate(self.data.cast(), new_len * PTR_SIZE) }.cast();
        if new_data.is_null() {
            if new_len < self.len {
                // Shrink failed to compact, but the truncation itself is done.
                self.len = new_len;
                return Ok(());
            }
            crate::set_error_msg!("failed to reallocate memory for string array");
            return Err(ErrorKind::BadAlloc);
        }
        for i in self.len..new_len {
            // SAFETY: the new vector has new_len slots.
            unsafe { *new_data.add(i) = std::ptr::null_mut() };
        }
        self.data = new_data;
        self.len = new_len;
        Ok(())
    }
}

impl PartialEq for StringArray {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StringArray {}

impl PartialOrd for StringArray {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringArray {
    fn cmp(&self, other: &Self) -> Ordering {
        let common = self.len.min(other.len);
        for i in 0..common {
            // Empty slots order before filled ones.
            match self.get(i).cmp(&other.get(i)) {
                Ordering::Equal => continue,
                other_order => return other_order,
            }
        }
        self.len.cmp(&other.len)
    }
}

impl Drop for StringArray {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl fmt::Debug for StringArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries((0..self.len).map(|i| self.get(i))).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_array_finis_twice() {
        let mut array = StringArray::zeroed();
        assert!(array.fini().is_ok());
        assert!(array.fini().is_ok());
    }

    #[test]
    fn sparse_fill_and_read_back() {
        let alloc = AllocHandle::default_allocator();
        let mut array = StringArray::init(3, &alloc).unwrap();
        array.set(0, Some("alpha")).unwrap();
        array.set(2, Some("gamma")).unwrap();
        assert_eq!(array.get(0), Some("alpha"));
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(2), Some("gamma"));
        assert_eq!(array.get(3), None);
    }

    #[test]
    fn overwrite_frees_previous_owner() {
        let alloc = AllocHandle::default_allocator();
        let mut array = StringArray::init(1, &alloc).unwrap();
        array.set(0, Some("first")).unwrap();
        array.set(0, Some("second")).unwrap();
        assert_eq!(array.get(0), Some("second"));
        array.set(0, None).unwrap();
        assert_eq!(array.get(0), None);
    }

    #[test]
    fn out_of_range_set_is_invalid() {
        let alloc = AllocHandle::default_allocator();
        let mut array = StringArray::init(1, &alloc).unwrap();
        assert_eq!(array.set(1, Some("x")), Err(ErrorKind::InvalidArgument));
        crate::error::reset_error();
    }

    #[test]
    fn resize_preserves_prefix_and_clears_suffix() {
        let alloc = AllocHandle::default_allocator();
        let mut array = StringArray::init(2, &alloc).unwrap();
        array.set(0, Some("keep")).unwrap();
        array.set(1, Some("drop")).unwrap();
        array.resize(4).unwrap();
        assert_eq!(array.get(0), Some("keep"));
        assert_eq!(array.get(2), None);
        array.resize(1).unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(0), Some("keep"));
        array.resize(0).unwrap();
        assert!(array.is_empty());
    }

    #[test]
    fn ordering_is_element_wise_then_by_length() {
        let alloc = AllocHandle::default_allocator();
        let mut a = StringArray::init(2, &alloc).unwrap();
        let mut b = StringArray::init(2, &alloc).unwrap();
        a.set(0, Some("aaa")).unwrap();
        b.set(0, Some("aab")).unwrap();
        assert!(a < b);
        b.set(0, Some("aaa")).unwrap();
        assert_eq!(a, b);
        let c = StringArray::init(3, &alloc).unwrap();
        assert!(StringArray::init(2, &alloc).unwrap() < c);
    }
}
