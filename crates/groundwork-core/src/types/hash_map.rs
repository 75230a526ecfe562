//! Open-addressing hash map with caller-supplied hash and equality.
//!
//! Keys and values are stored by value (bitwise copies); the table is a
//! single slot array probed linearly, growing to the next power of two
//! when the load factor reaches 0.75. Removal uses tombstones, which the
//! next rehash compacts away.
//!
//! Two canonical key profiles are bundled: nul-terminated
//! string-by-pointer ([`StrPtr`] with [`string_hash`] / [`string_eq`])
//! and arbitrary byte blob ([`blob_hash`] / [`blob_eq`]).

use std::fmt;
use std::mem::MaybeUninit;

use crate::allocator::AllocHandle;
use crate::error::ErrorKind;
use crate::maybe_return_error;

/// Hash function over a key.
pub type HashMapHashFn<K> = fn(&K) -> usize;
/// Equality predicate over two keys.
pub type HashMapEqFn<K> = fn(&K, &K) -> bool;

const SLOT_EMPTY: u8 = 0;
const SLOT_OCCUPIED: u8 = 1;
const SLOT_DELETED: u8 = 2;

#[repr(C)]
struct Slot<K, V> {
    state: u8,
    hash: usize,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

pub struct HashMap<K: Copy, V: Copy> {
    slots: *mut Slot<K, V>,
    /// Power of two (or zero before initialization).
    capacity: usize,
    /// Live entries.
    size: usize,
    /// Live entries plus tombstones; drives the load-factor check.
    used: usize,
    hash_fn: HashMapHashFn<K>,
    eq_fn: HashMapEqFn<K>,
    allocator: AllocHandle,
}

// SAFETY: the table is exclusively owned through the raw slot pointer and
// entries are bitwise copies. Keys that are themselves pointers (StrPtr)
// follow their owner's synchronization discipline, not the map's.
unsafe impl<K: Copy, V: Copy> Send for HashMap<K, V> {}
unsafe impl<K: Copy, V: Copy> Sync for HashMap<K, V> {}

fn zeroed_hash<K>(_key: &K) -> usize {
    0
}

fn zeroed_eq<K>(_a: &K, _b: &K) -> bool {
    false
}

impl<K: Copy, V: Copy> HashMap<K, V> {
    /// A zero-initialized map; `fini` on it is a no-op and every lookup
    /// misses.
    pub const fn zeroed() -> Self {
        HashMap {
            slots: std::ptr::null_mut(),
            capacity: 0,
            size: 0,
            used: 0,
            hash_fn: zeroed_hash::<K>,
            eq_fn: zeroed_eq::<K>,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// Create a map. `initial_capacity` is rounded up to a power of two.
    pub fn with_capacity(
        initial_capacity: usize,
        hash_fn: HashMapHashFn<K>,
        eq_fn: HashMapEqFn<K>,
        allocator: &AllocHandle,
    ) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("hash map initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        // The allocator contract guarantees fundamental (malloc) alignment.
        debug_assert!(std::mem::align_of::<Slot<K, V>>() <= 16);

        let capacity = initial_capacity.max(2).next_power_of_two();
        let slots: *mut Slot<K, V> = allocator
            .zero_allocate(capacity, std::mem::size_of::<Slot<K, V>>())
            .cast();
        if slots.is_null() {
            crate::set_error_msg!("failed to allocate memory for hash map");
            return Err(ErrorKind::BadAlloc);
        }
        Ok(HashMap {
            slots,
            capacity,
            size: 0,
            used: 0,
            hash_fn,
            eq_fn,
            allocator: allocator.clone(),
        })
    }

    /// Release the slot array and return to the zero-initialized state.
    pub fn fini(&mut self) -> crate::Result {
        if !self.slots.is_null() {
            // SAFETY: the slot array came from self.allocator.
            unsafe { self.allocator.deallocate(self.slots.cast()) };
        }
        self.slots = std::ptr::null_mut();
        self.capacity = 0;
        self.size = 0;
        self.used = 0;
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

    fn slot(&self, index: usize) -> &Slot<K, V> {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the array is live.
        unsafe { &*self.slots.add(index) }
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<K, V> {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the array is live.
        unsafe { &mut *self.slots.add(index) }
    }

    /// Index of the occupied slot holding `key`, if any.
    fn find_occupied(&self, key: &K) -> Option<usize> {
        if self.capacity == 0 || self.size == 0 {
            return None;
        }
        let hash = (self.hash_fn)(key);
        let mask = self.capacity - 1;
        let mut index = hash & mask;
        for _ in 0..self.capacity {
            let slot = self.slot(index);
            match slot.state {
                SLOT_EMPTY => return None,
                SLOT_OCCUPIED if slot.hash == hash => {
                    // SAFETY: occupied slots hold initialized keys.
                    let stored = unsafe { slot.key.assume_init_ref() };
                    if (self.eq_fn)(stored, key) {
                        return Some(index);
                    }
                }
                _ => {}
            }
            index = (index + 1) & mask;
        }
        None
    }

    fn rehash(&mut self, new_capacity: usize) -> crate::Result {
        let new_slots: *mut Slot<K, V> = self
            .allocator
            .zero_allocate(new_capacity, std::mem::size_of::<Slot<K, V>>())
            .cast();
        if new_slots.is_null() {
            crate::set_error_msg!("failed to grow hash map, entries left intact");
            return Err(ErrorKind::BadAlloc);
        }
        let mask = new_capacity - 1;
        for i in 0..self.capacity {
            let slot = self.slot(i);
            if slot.state != SLOT_OCCUPIED {
                continue;
            }
            let mut index = slot.hash & mask;
            // SAFETY: the new array has new_capacity zeroed (empty) slots
            // and holds fewer entries than capacity, so probing terminates.
            unsafe {
                while (*new_slots.add(index)).state == SLOT_OCCUPIED {
                    index = (index + 1) & mask;
                }
                let target = &mut *new_slots.add(index);
                target.state = SLOT_OCCUPIED;
                target.hash = slot.hash;
                target.key = MaybeUninit::new(slot.key.assume_init());
                target.value = MaybeUninit::new(slot.value.assume_init());
            }
        }
        // SAFETY: the old array came from self.allocator.
        unsafe { self.allocator.deallocate(self.slots.cast()) };
        self.slots = new_slots;
        self.capacity = new_capacity;
        self.used = self.size;
        Ok(())
    }

    /// Copy `key -> value` into the map.
    ///
    /// An existing key keeps the stored key bits; only the value is
    /// replaced. Grows (rehashes) when the load factor would reach 0.75.
    pub fn set(&mut self, key: &K, value: &V) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if self.slots.is_null() {
            crate::set_error_msg!("hash map used before initialization");
            return Err(ErrorKind::InvalidArgument);
        }

        if let Some(index) = self.find_occupied(key) {
            self.slot_mut(index).value = MaybeUninit::new(*value);
            return Ok(());
        }

        if (self.used + 1) * 4 >= self.capacity * 3 {
            self.rehash(self.capacity * 2)?;
        }

        let hash = (self.hash_fn)(key);
        let mask = self.capacity - 1;
        let mut index = hash & mask;
        loop {
            let state = self.slot(index).state;
            if state != SLOT_OCCUPIED {
                let took_empty = state == SLOT_EMPTY;
                let slot = self.slot_mut(index);
                slot.state = SLOT_OCCUPIED;
                slot.hash = hash;
                slot.key = MaybeUninit::new(*key);
                slot.value = MaybeUninit::new(*value);
                self.size += 1;
                if took_empty {
                    self.used += 1;
                }
                return Ok(());
            }
            index = (index + 1) & mask;
        }
    }

    /// Remove `key`. The slot becomes a tombstone until the next rehash.
    pub fn unset(&mut self, key: &K) -> crate::Result {
        let Some(index) = self.find_occupied(key) else {
            return Err(ErrorKind::NotFound);
        };
        self.slot_mut(index).state = SLOT_DELETED;
        self.size -= 1;
        Ok(())
    }

    /// Whether `key` is present.
    pub fn key_exists(&self, key: &K) -> bool {
        self.find_occupied(key).is_some()
    }

    /// Copy out the value stored for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let index = self.find_occupied(key)?;
        // SAFETY: occupied slots hold initialized values.
        Some(unsafe { self.slot(index).value.assume_init() })
    }

    /// Walk the entries in slot order, copying out `(key, value)` pairs.
    ///
    /// `None` starts at the first entry; passing the key returned by the
    /// previous call resumes after its slot. Returns
    /// `HashMapNoMoreEntries` when exhausted and `NotFound` when the
    /// previous key has disappeared. Callers must not mutate the map
    /// mid-walk.
    pub fn get_next_key_and_data(&self, previous_key: Option<&K>) -> crate::Result<(K, V)> {
        if self.slots.is_null() {
            return Err(ErrorKind::HashMapNoMoreEntries);
        }
        let start = match previous_key {
            None => 0,
            Some(previous) => match self.find_occupied(previous) {
                Some(index) => index + 1,
                None => return Err(ErrorKind::NotFound),
            },
        };
        for i in start..self.capacity {
            let slot = self.slot(i);
            if slot.state == SLOT_OCCUPIED {
                // SAFETY: occupied slots hold initialized keys and values.
                return Ok(unsafe { (slot.key.assume_init(), slot.value.assume_init()) });
            }
        }
        Err(ErrorKind::HashMapNoMoreEntries)
    }

    /// Copy every entry of `self` into `destination`.
    pub fn copy_into(&self, destination: &mut HashMap<K, V>) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        let mut cursor = self.get_next_key_and_data(None);
        loop {
            match cursor {
                Ok((key, value)) => {
                    destination.set(&key, &value)?;
                    cursor = self.get_next_key_and_data(Some(&key));
                }
                Err(ErrorKind::HashMapNoMoreEntries) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<K: Copy, V: Copy> Drop for HashMap<K, V> {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl<K: Copy, V: Copy> fmt::Debug for HashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMap")
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Canonical key profiles
// ---------------------------------------------------------------------------

/// Nul-terminated string key, stored by pointer.
///
/// The map copies only the pointer; whoever inserts it owns the pointed-to
/// string and must keep it alive while the entry exists.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StrPtr(pub *const u8);

impl StrPtr {
    /// Borrow the pointed-to string.
    ///
    /// # Safety
    ///
    /// The pointer must reference a live, nul-terminated UTF-8 string.
    pub unsafe fn as_str<'a>(&self) -> &'a str {
        // SAFETY: forwarded caller contract.
        unsafe { crate::allocator::owned_str(self.0) }
    }
}

// SAFETY: a StrPtr is just an address; the pointed-to string's
// synchronization is its owner's responsibility.
unsafe impl Send for StrPtr {}
unsafe impl Sync for StrPtr {}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> usize {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as usize
}

/// FNV-1a over the pointed-to string's bytes.
pub fn string_hash(key: &StrPtr) -> usize {
    if key.0.is_null() {
        return 0;
    }
    // SAFETY: the string profile requires live nul-terminated strings.
    let s = unsafe { std::ffi::CStr::from_ptr(key.0.cast()) };
    fnv1a(s.to_bytes())
}

/// Byte equality of the pointed-to strings.
pub fn string_eq(a: &StrPtr, b: &StrPtr) -> bool {
    if a.0.is_null() || b.0.is_null() {
        return a.0 == b.0;
    }
    // SAFETY: the string profile requires live nul-terminated strings.
    unsafe {
        std::ffi::CStr::from_ptr(a.0.cast()) == std::ffi::CStr::from_ptr(b.0.cast())
    }
}

/// FNV-1a over the raw bytes of the key value.
///
/// Meant for padding-free, plain-data key types (integers, packed ids).
pub fn blob_hash<K: Copy>(key: &K) -> usize {
    // SAFETY: K is plain data; reading its bytes is the blob contract.
    let bytes = unsafe {
        std::slice::from_raw_parts((key as *const K).cast::<u8>(), std::mem::size_of::<K>())
    };
    fnv1a(bytes)
}

/// Byte equality of two key values.
pub fn blob_eq<K: Copy>(a: &K, b: &K) -> bool {
    // SAFETY: K is plain data; comparing its bytes is the blob contract.
    unsafe {
        let a = std::slice::from_raw_parts((a as *const K).cast::<u8>(), std::mem::size_of::<K>());
        let b = std::slice::from_raw_parts((b as *const K).cast::<u8>(), std::mem::size_of::<K>());
        a == b
    }
}
