//! Ordered list of fixed-size elements over the allocator contract.
//!
//! Elements are stored by value; `get` copies out, `remove` shifts the
//! tail down. Capacity doubles on overflow and never shrinks.

use std::fmt;

use crate::allocator::AllocHandle;
use crate::error::ErrorKind;
use crate::maybe_return_error;

pub struct ArrayList<T: Copy> {
    data: *mut T,
    size: usize,
    capacity: usize,
    allocator: AllocHandle,
}

// SAFETY: the list exclusively owns its buffer; elements are bitwise
// copies.
unsafe impl<T: Copy> Send for ArrayList<T> {}

impl<T: Copy> ArrayList<T> {
    /// A zero-initialized list; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        ArrayList {
            data: std::ptr::null_mut(),
            size: 0,
            capacity: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// Create a list with room for `initial_capacity` elements.
    pub fn with_capacity(initial_capacity: usize, allocator: &AllocHandle) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if initial_capacity == 0 {
            crate::set_error_msg!("array list initial capacity cannot be zero");
            return Err(ErrorKind::InvalidArgument);
        }
        if !allocator.is_valid() {
            crate::set_error_msg!("array list initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        debug_assert!(std::mem::align_of::<T>() <= 16);
        let data: *mut T = allocator
            .allocate(initial_capacity * std::mem::size_of::<T>())
            .cast();
        if data.is_null() {
            crate::set_error_msg!("failed to allocate memory for array list");
            return Err(ErrorKind::BadAlloc);
        }
        Ok(ArrayList {
            data,
            size: 0,
            capacity: initial_capacity,
            allocator: allocator.clone(),
        })
    }

    /// Release the buffer and return to the zero-initialized state.
    pub fn fini(&mut self) -> crate::Result {
        if !self.data.is_null() {
            // SAFETY: the buffer came from self.allocator.
            unsafe { self.allocator.deallocate(self.data.cast()) };
        }
        self.data = std::ptr::null_mut();
        self.size = 0;
        self.capacity = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a copy of `value`, doubling capacity when full.
    pub fn add(&mut self, value: &T) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if self.data.is_null() {
            crate::set_error_msg!("array list used before initialization");
            return Err(ErrorKind::InvalidArgument);
        }
        if self.size == self.capacity {
            let new_capacity = self.capacity * 2;
            // SAFETY: data is owned; on failure the old buffer is kept.
            let new_data: *mut T = unsafe {
                self.allocator
                    .reallocate(self.data.cast(), new_capacity * std::mem::size_of::<T>())
            }
            .cast();
            if new_data.is_null() {
                crate::set_error_msg!("failed to grow array list");
                return Err(ErrorKind::BadAlloc);
            }
            self.data = new_data;
            self.capacity = new_capacity;
        }
        // SAFETY: size < capacity after the growth check.
        unsafe { self.data.add(self.size).write(*value) };
        self.size += 1;
        Ok(())
    }

    /// Overwrite the element at `index`.
    pub fn set(&mut self, index: usize, value: &T) -> crate::Result {
        if index >= self.size {
            crate::set_error_fmt!("array list index {} out of range (size {})", index, self.size);
            return Err(ErrorKind::InvalidArgument);
        }
        // SAFETY: index < size.
        unsafe { self.data.add(index).write(*value) };
        Ok(())
    }

    /// Copy out the element at `index`.
    pub fn get(&self, index: usize) -> crate::Result<T> {
        if index >= self.size {
            crate::set_error_fmt!("array list index {} out of range (size {})", index, self.size);
            return Err(ErrorKind::InvalidArgument);
        }
        // SAFETY: index < size, and elements below size are initialized.
        Ok(unsafe { self.data.add(index).read() })
    }

    /// Remove the element at `index`, shifting the tail down.
    pub fn remove(&mut self, index: usize) -> crate::Result {
        if index >= self.size {
            crate::set_error_fmt!("array list index {} out of range (size {})", index, self.size);
            return Err(ErrorKind::InvalidArgument);
        }
        // SAFETY: both ranges are inside the initialized prefix.
        unsafe {
            std::ptr::copy(
                self.data.add(index + 1),
                self.data.add(index),
                self.size - index - 1,
            );
        }
        self.size -= 1;
        Ok(())
    }
}

impl<T: Copy> Drop for ArrayList<T> {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for ArrayList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for i in 0..self.size {
            // SAFETY: i < size.
            list.entry(unsafe { &*self.data.add(i) });
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_list(capacity: usize) -> ArrayList<i64> {
        ArrayList::with_capacity(capacity, &AllocHandle::default_allocator()).unwrap()
    }

    #[test]
    fn zeroed_list_finis_twice() {
        let mut list: ArrayList<u8> = ArrayList::zeroed();
        assert!(list.fini().is_ok());
        assert!(list.fini().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = ArrayList::<u8>::with_capacity(0, &AllocHandle::default_allocator());
        assert_eq!(result.err(), Some(ErrorKind::InvalidArgument));
        crate::error::reset_error();
    }

    #[test]
    fn add_get_set_round_trip() {
        let mut list = new_list(2);
        list.add(&10).unwrap();
        list.add(&20).unwrap();
        list.add(&30).unwrap(); // forces growth
        assert_eq!(list.len(), 3);
        assert_eq!(list.capacity(), 4);
        assert_eq!(list.get(0).unwrap(), 10);
        assert_eq!(list.get(2).unwrap(), 30);

        list.set(1, &21).unwrap();
        assert_eq!(list.get(1).unwrap(), 21);
    }

    #[test]
    fn remove_shifts_tail() {
        let mut list = new_list(4);
        for v in [1, 2, 3, 4] {
            list.add(&v).unwrap();
        }
        list.remove(1).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0).unwrap(), 1);
        assert_eq!(list.get(1).unwrap(), 3);
        assert_eq!(list.get(2).unwrap(), 4);
    }

    #[test]
    fn out_of_range_indices_are_invalid() {
        let mut list = new_list(1);
        list.add(&1).unwrap();
        assert_eq!(list.get(1).err(), Some(ErrorKind::InvalidArgument));
        assert_eq!(list.set(1, &0).err(), Some(ErrorKind::InvalidArgument));
        assert_eq!(list.remove(1).err(), Some(ErrorKind::InvalidArgument));
        crate::error::reset_error();
    }

    #[test]
    fn many_appends_preserve_order() {
        let mut list = new_list(1);
        for i in 0..1000 {
            list.add(&i).unwrap();
        }
        for i in 0..1000usize {
            assert_eq!(list.get(i).unwrap(), i as i64);
        }
    }
}
