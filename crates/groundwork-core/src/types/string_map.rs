//! Owned string-to-string map over the allocator contract.
//!
//! Storage is a pair of dense slot arrays (keys, values) with capacity
//! tracked separately from size; a slot is live when its key pointer is
//! non-null. Keys and values are copied in and owned exclusively by the
//! map. Iteration walks the slot arrays in order, which is stable between
//! mutations; handing a previously-returned key back to
//! [`StringMap::get_next_key`] resumes by pointer identity.

use std::fmt;

use crate::allocator::{AllocHandle, owned_str};
use crate::error::ErrorKind;
use crate::maybe_return_error;

const PTR_SIZE: usize = std::mem::size_of::<*mut u8>();

pub struct StringMap {
    keys: *mut *mut u8,
    values: *mut *mut u8,
    capacity: usize,
    size: usize,
    allocator: AllocHandle,
}

// SAFETY: the map exclusively owns the allocations behind its raw
// pointers; moving it between threads moves that ownership with it.
unsafe impl Send for StringMap {}

impl StringMap {
    /// A zero-initialized map; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        StringMap {
            keys: std::ptr::null_mut(),
            values: std::ptr::null_mut(),
            capacity: 0,
            size: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// Create a map with room for `initial_capacity` entries.
    pub fn with_capacity(initial_capacity: usize, allocator: &AllocHandle) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("string map initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut map = StringMap::zeroed();
        map.allocator = allocator.clone();
        map.reserve(initial_capacity)?;
        Ok(map)
    }

    /// Release every entry and the slot arrays.
    pub fn fini(&mut self) -> crate::Result {
        self.clear();
        self.reserve(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Ensure room for `capacity` entries.
    ///
    /// Requests below the current size clamp upward to the size (capacity
    /// never drops below the live entries). `reserve(0)` is the release
    /// path and is only reachable with an empty map.
    pub fn reserve(&mut self, capacity: usize) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if capacity < self.size {
            return self.reserve(self.size);
        }
        if capacity == self.capacity {
            return Ok(());
        }
        if capacity == 0 {
            // Only reachable when size == 0, per the clamp above.
            // SAFETY: both arrays are owned by self.allocator (or null).
            unsafe {
                self.allocator.deallocate(self.keys.cast());
                self.allocator.deallocate(self.values.cast());
            }
            self.keys = std::ptr::null_mut();
            self.values = std::ptr::null_mut();
            self.capacity = 0;
            return Ok(());
        }

        // SAFETY: keys is null or owned; on failure the old array is kept.
        let new_keys: *mut *mut u8 =
            unsafe { self.allocator.reallocate(self.keys.cast(), capacity * PTR_SIZE) }.cast();
        if new_keys.is_null() {
            crate::set_error_msg!("failed to allocate memory for string map keys");
            return Err(ErrorKind::BadAlloc);
        }
        self.keys = new_keys;
        // SAFETY: values is null or owned; on failure the old array is kept.
        let new_values: *mut *mut u8 =
            unsafe { self.allocator.reallocate(self.values.cast(), capacity * PTR_SIZE) }.cast();
        if new_values.is_null() {
            crate::set_error_msg!("failed to allocate memory for string map values");
            return Err(ErrorKind::BadAlloc);
        }
        self.values = new_values;

        for i in self.capacity..capacity {
            // SAFETY: both arrays now have `capacity` slots.
            unsafe {
                *self.keys.add(i) = std::ptr::null_mut();
                *self.values.add(i) = std::ptr::null_mut();
            }
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Drop every entry, keeping the slot arrays.
    pub fn clear(&mut self) {
        for i in 0..self.capacity {
            // SAFETY: slot i is in bounds; live entries are owned strings.
            unsafe {
                let key_slot = self.keys.add(i);
                if !(*key_slot).is_null() {
                    self.allocator.deallocate(*key_slot);
                    *key_slot = std::ptr::null_mut();
                    let value_slot = self.values.add(i);
                    self.allocator.deallocate(*value_slot);
                    *value_slot = std::ptr::null_mut();
                }
            }
        }
        self.size = 0;
    }

    fn find_index(&self, key: &str) -> Option<usize> {
        for i in 0..self.capacity {
            // SAFETY: slot i is in bounds.
            let entry = unsafe { *self.keys.add(i) };
            if entry.is_null() {
                continue;
            }
            // SAFETY: live keys are nul-terminated UTF-8 strings.
            if unsafe { owned_str(entry) } == key {
                return Some(i);
            }
        }
        None
    }

    /// Copy `key -> value` into the map, growing if necessary.
    ///
    /// An existing key has its value replaced; the stored key allocation
    /// is retained.
    pub fn set(&mut self, key: &str, value: &str) -> crate::Result {
        match self.set_no_resize(key, value) {
            Err(ErrorKind::NotEnoughSpace) => {
                let new_capacity = if self.capacity == 0 { 1 } else { self.capacity * 2 };
                self.reserve(new_capacity)?;
                self.set_no_resize(key, value)
            }
            other => other,
        }
    }

    /// Copy `key -> value` into the map without growing.
    ///
    /// Fails with `NotEnoughSpace` when the key is new and the map is
    /// full; no error message is set for that case.
    pub fn set_no_resize(&mut self, key: &str, value: &str) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        let (index, new_key) = match self.find_index(key) {
            Some(index) => (index, false),
            None => {
                debug_assert!(self.size <= self.capacity);
                if self.size == self.capacity {
                    return Err(ErrorKind::NotEnoughSpace);
                }
                let mut free = None;
                for i in 0..self.capacity {
                    // SAFETY: slot i is in bounds.
                    if unsafe { *self.keys.add(i) }.is_null() {
                        free = Some(i);
                        break;
                    }
                }
                let index = free.expect("size < capacity implies a free slot");
                let key_copy = self.allocator.alloc_string(key);
                if key_copy.is_null() {
                    crate::set_error_msg!("failed to allocate memory for string map key");
                    return Err(ErrorKind::BadAlloc);
                }
                // SAFETY: index is a free slot in bounds.
                unsafe { *self.keys.add(index) = key_copy };
                (index, true)
            }
        };

        let value_copy = self.allocator.alloc_string(value);
        if value_copy.is_null() {
            if new_key {
                // Roll the half-inserted entry back out.
                // SAFETY: the slot holds the key allocated just above.
                unsafe {
                    self.allocator.deallocate(*self.keys.add(index));
                    *self.keys.add(index) = std::ptr::null_mut();
                }
            }
            crate::set_error_msg!("failed to allocate memory for string map value");
            return Err(ErrorKind::BadAlloc);
        }

        // SAFETY: index is in bounds; any previous value is owned here.
        unsafe {
            let value_slot = self.values.add(index);
            self.allocator.deallocate(*value_slot);
            *value_slot = value_copy;
        }
        if new_key {
            self.size += 1;
        }
        Ok(())
    }

    /// Remove `key`, freeing the stored copies.
    pub fn unset(&mut self, key: &str) -> crate::Result {
        let Some(index) = self.find_index(key) else {
            return Err(ErrorKind::KeyNotFound);
        };
        // SAFETY: index refers to a live entry.
        unsafe {
            let key_slot = self.keys.add(index);
            self.allocator.deallocate(*key_slot);
            *key_slot = std::ptr::null_mut();
            let value_slot = self.values.add(index);
            self.allocator.deallocate(*value_slot);
            *value_slot = std::ptr::null_mut();
        }
        self.size -= 1;
        Ok(())
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.find_index(key).is_some()
    }

    /// The value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let index = self.find_index(key)?;
        // SAFETY: live entries have non-null, nul-terminated values.
        Some(unsafe { owned_str(*self.values.add(index)) })
    }

    /// Walk the keys in slot order.
    ///
    /// `None` returns the first key; passing the previously returned key
    /// (matched by pointer identity) returns the one after it. Mutating
    /// the map invalidates an in-progress walk.
    pub fn get_next_key(&self, previous_key: Option<&str>) -> Option<&str> {
        let start = match previous_key {
            None => 0,
            Some(previous) => {
                let mut found = None;
                for i in 0..self.capacity {
                    // SAFETY: slot i is in bounds.
                    let entry = unsafe { *self.keys.add(i) };
                    if !entry.is_null() && std::ptr::eq(entry.cast_const(), previous.as_ptr()) {
                        found = Some(i + 1);
                        break;
                    }
                }
                found?
            }
        };
        for i in start..self.capacity {
            // SAFETY: slot i is in bounds.
            let entry = unsafe { *self.keys.add(i) };
            if !entry.is_null() {
                // SAFETY: live keys are nul-terminated UTF-8 strings.
                return Some(unsafe { owned_str(entry) });
            }
        }
        None
    }

    /// Copy every entry of `self` into `destination`.
    pub fn copy_into(&self, destination: &mut StringMap) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        let mut key = self.get_next_key(None);
        while let Some(k) = key {
            let value = self
                .get(k)
                .expect("iterated key must have a value");
            destination.set(k, value)?;
            key = self.get_next_key(Some(k));
        }
        Ok(())
    }
}

impl Drop for StringMap {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl fmt::Debug for StringMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        let mut key = self.get_next_key(None);
        while let Some(k) = key {
            map.entry(&k, &self.get(k));
            key = self.get_next_key(Some(k));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_map(capacity: usize) -> StringMap {
        StringMap::with_capacity(capacity, &AllocHandle::default_allocator()).unwrap()
    }

    #[test]
    fn zeroed_map_finis_twice() {
        let mut map = StringMap::zeroed();
        assert!(map.fini().is_ok());
        assert!(map.fini().is_ok());
    }

    #[test]
    fn set_get_round_trip() {
        let mut map = new_map(2);
        map.set("key1", "value1").unwrap();
        assert_eq!(map.get("key1"), Some("value1"));
        assert_eq!(map.get("key2"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn overwrite_keeps_size() {
        let mut map = new_map(2);
        map.set("k", "v1").unwrap();
        map.set("k", "v2").unwrap();
        assert_eq!(map.get("k"), Some("v2"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unset_removes_and_shrinks_size() {
        let mut map = new_map(2);
        map.set("k", "v").unwrap();
        map.unset("k").unwrap();
        assert_eq!(map.get("k"), None);
        assert_eq!(map.len(), 0);
        assert_eq!(map.unset("k"), Err(ErrorKind::KeyNotFound));
    }

    #[test]
    fn growth_doubles_from_one() {
        let mut map = new_map(1);
        map.set("k1", "v1").unwrap();
        assert_eq!((map.len(), map.capacity()), (1, 1));
        map.set("k2", "v2").unwrap();
        assert_eq!((map.len(), map.capacity()), (2, 2));
        map.set("k3", "v3").unwrap();
        assert_eq!((map.len(), map.capacity()), (3, 4));
        map.unset("k2").unwrap();
        assert_eq!((map.len(), map.capacity()), (2, 4));
        assert_eq!(map.get("k1"), Some("v1"));
        assert_eq!(map.get("k3"), Some("v3"));
        assert_eq!(map.get("k2"), None);
    }

    #[test]
    fn set_no_resize_reports_capacity_exhaustion() {
        let mut map = new_map(1);
        map.set_no_resize("k1", "v1").unwrap();
        assert_eq!(map.set_no_resize("k2", "v2"), Err(ErrorKind::NotEnoughSpace));
        // Overwriting an existing key needs no free slot.
        map.set_no_resize("k1", "v1b").unwrap();
        assert_eq!(map.get("k1"), Some("v1b"));
    }

    #[test]
    fn reserve_zero_on_nonempty_map_clamps_to_size() {
        let mut map = new_map(4);
        map.set("k", "v").unwrap();
        map.reserve(0).unwrap();
        assert!(map.capacity() >= map.len());
        assert_eq!(map.get("k"), Some("v"));
    }

    #[test]
    fn iteration_visits_every_key_once() {
        let mut map = new_map(4);
        map.set("a", "1").unwrap();
        map.set("b", "2").unwrap();
        map.set("c", "3").unwrap();

        let mut seen = Vec::new();
        let mut key = map.get_next_key(None);
        while let Some(k) = key {
            seen.push(k.to_string());
            key = map.get_next_key(Some(k));
        }
        seen.sort();
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[test]
    fn iteration_requires_pointer_identity() {
        let mut map = new_map(2);
        map.set("a", "1").unwrap();
        // A byte-equal key with a different address does not resume.
        let detached = String::from("a");
        assert_eq!(map.get_next_key(Some(detached.as_str())), None);
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let mut map = new_map(4);
        map.set("a", "1").unwrap();
        map.set("b", "2").unwrap();
        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), 4);
        assert_eq!(map.get("a"), None);
    }

    #[test]
    fn copy_into_replicates_entries() {
        let mut src = new_map(4);
        src.set("x", "1").unwrap();
        src.set("y", "2").unwrap();
        let mut dst = new_map(1);
        src.copy_into(&mut dst).unwrap();
        assert_eq!(dst.get("x"), Some("1"));
        assert_eq!(dst.get("y"), Some("2"));
        assert_eq!(dst.len(), 2);
    }

    #[test]
    fn randomized_workload_matches_std_map() {
        use rand::Rng;
        let mut reference = std::collections::HashMap::new();
        let mut map = new_map(0);
        let mut rng = rand::rng();

        for _ in 0..500 {
            let key = format!("k{}", rng.random_range(0..40));
            if rng.random_bool(0.7) {
                let value = format!("v{}", rng.random_range(0..1000));
                map.set(&key, &value).unwrap();
                reference.insert(key, value);
            } else {
                let expected = reference.remove(&key);
                let result = map.unset(&key);
                assert_eq!(result.is_ok(), expected.is_some());
            }
            assert_eq!(map.len(), reference.len());
            assert!(map.len() <= map.capacity() || map.capacity() == 0);
        }
        for (k, v) in &reference {
            assert_eq!(map.get(k), Some(v.as_str()));
        }
    }
}
