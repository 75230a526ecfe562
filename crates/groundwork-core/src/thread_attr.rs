//! Thread attribute container.
//!
//! Describes how worker threads should be scheduled (policy, priority,
//! name, and which logical cores they may run on) without performing any
//! thread configuration itself; an executor consumes these descriptors.
//! A declarative JSON form (see [`thread_attrs_from_json`]) lets
//! deployments ship the same information as data.

use serde::{Deserialize, Serialize};

use crate::allocator::{AllocHandle, owned_str};
use crate::error::ErrorKind;
use crate::maybe_return_error;

/// Thread scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    Unknown,
    Fifo,
    Rr,
    Sporadic,
    Other,
    Idle,
    Batch,
    Deadline,
}

impl std::fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Fifo => write!(f, "fifo"),
            Self::Rr => write!(f, "rr"),
            Self::Sporadic => write!(f, "sporadic"),
            Self::Other => write!(f, "other"),
            Self::Idle => write!(f, "idle"),
            Self::Batch => write!(f, "batch"),
            Self::Deadline => write!(f, "deadline"),
        }
    }
}

// ---------------------------------------------------------------------------
// Core affinity bitset
// ---------------------------------------------------------------------------

/// Grow-on-set bitset of logical cores a thread may run on.
///
/// Capacity is kept in whole bytes; setting a bit beyond the current
/// capacity grows the set, preserving existing bits.
pub struct CoreAffinity {
    set: *mut u8,
    /// Capacity in bits (always a multiple of 8).
    core_count: usize,
    allocator: AllocHandle,
}

// SAFETY: the bitset exclusively owns its buffer.
unsafe impl Send for CoreAffinity {}

fn round_up_to_byte(bits: usize) -> usize {
    bits.div_ceil(8) * 8
}

impl CoreAffinity {
    /// A zero-initialized set; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        CoreAffinity {
            set: std::ptr::null_mut(),
            core_count: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// An empty set that grows on demand.
    pub fn init(allocator: &AllocHandle) -> crate::Result<Self> {
        Self::init_with_capacity(allocator, 0)
    }

    /// A set pre-sized for `num_cores` cores (rounded up to whole bytes).
    pub fn init_with_capacity(allocator: &AllocHandle, num_cores: usize) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("core affinity initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut affinity = CoreAffinity::zeroed();
        affinity.allocator = allocator.clone();
        if num_cores == 0 {
            return Ok(affinity);
        }
        let bytes = round_up_to_byte(num_cores) / 8;
        affinity.set = allocator.zero_allocate(bytes, 1);
        if affinity.set.is_null() {
            crate::set_error_msg!("failed to allocate memory for core affinity set");
            return Err(ErrorKind::BadAlloc);
        }
        affinity.core_count = bytes * 8;
        Ok(affinity)
    }

    /// Release the bit storage and return to the zero-initialized state.
    pub fn fini(&mut self) -> crate::Result {
        if !self.set.is_null() {
            // SAFETY: the buffer came from self.allocator.
            unsafe { self.allocator.deallocate(self.set) };
        }
        self.set = std::ptr::null_mut();
        self.core_count = 0;
        Ok(())
    }

    /// Capacity, in bits.
    pub fn core_count(&self) -> usize {
        self.core_count
    }

    fn grow_for(&mut self, core: usize) -> crate::Result {
        if core < self.core_count {
            return Ok(());
        }
        let new_bytes = round_up_to_byte(core + 1) / 8;
        let old_bytes = self.core_count / 8;
        // SAFETY: set is null or owned; on failure the old buffer stays.
        let new_set = unsafe { self.allocator.reallocate(self.set, new_bytes) };
        if new_set.is_null() {
            crate::set_error_msg!("failed to grow core affinity set");
            return Err(ErrorKind::BadAlloc);
        }
        // SAFETY: the new buffer has new_bytes bytes; the tail is fresh.
        unsafe { std::ptr::write_bytes(new_set.add(old_bytes), 0, new_bytes - old_bytes) };
        self.set = new_set;
        self.core_count = new_bytes * 8;
        Ok(())
    }

    /// Mark `core` as usable, growing the set if needed.
    pub fn set_core(&mut self, core: usize) -> crate::Result {
        self.grow_for(core)?;
        // SAFETY: grow_for guarantees core < core_count.
        unsafe { *self.set.add(core / 8) |= 1 << (core % 8) };
        Ok(())
    }

    /// Unmark `core`. Out-of-capacity bits are already unset.
    pub fn unset_core(&mut self, core: usize) -> crate::Result {
        if core >= self.core_count {
            return Ok(());
        }
        // SAFETY: core < core_count.
        unsafe { *self.set.add(core / 8) &= !(1 << (core % 8)) };
        Ok(())
    }

    /// Whether `core` is marked.
    pub fn is_set(&self, core: usize) -> bool {
        if core >= self.core_count {
            return false;
        }
        // SAFETY: core < core_count.
        unsafe { *self.set.add(core / 8) & (1 << (core % 8)) != 0 }
    }

    /// Mark every core in `lo..=hi` (inclusive).
    pub fn fill(&mut self, lo: usize, hi: usize) -> crate::Result {
        if lo > hi {
            crate::set_error_msg!("core affinity range is inverted");
            return Err(ErrorKind::InvalidArgument);
        }
        self.grow_for(hi)?;
        for core in lo..=hi {
            // SAFETY: hi < core_count after grow_for.
            unsafe { *self.set.add(core / 8) |= 1 << (core % 8) };
        }
        Ok(())
    }

    /// Unmark every core in `lo..=hi` (inclusive).
    pub fn clear(&mut self, lo: usize, hi: usize) -> crate::Result {
        if lo > hi {
            crate::set_error_msg!("core affinity range is inverted");
            return Err(ErrorKind::InvalidArgument);
        }
        let hi = hi.min(self.core_count.saturating_sub(1));
        for core in lo..=hi {
            if core >= self.core_count {
                break;
            }
            // SAFETY: core < core_count.
            unsafe { *self.set.add(core / 8) &= !(1 << (core % 8)) };
        }
        Ok(())
    }

    /// Copy this set into `destination`, replacing its contents.
    pub fn copy_into(&self, destination: &mut CoreAffinity) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        destination.fini()?;
        destination.allocator = self.allocator.clone();
        if self.core_count == 0 {
            return Ok(());
        }
        let bytes = self.core_count / 8;
        destination.set = destination.allocator.allocate(bytes);
        if destination.set.is_null() {
            crate::set_error_msg!("failed to allocate memory for core affinity copy");
            return Err(ErrorKind::BadAlloc);
        }
        // SAFETY: both buffers hold `bytes` bytes.
        unsafe { std::ptr::copy_nonoverlapping(self.set, destination.set, bytes) };
        destination.core_count = self.core_count;
        Ok(())
    }
}

impl Drop for CoreAffinity {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl std::fmt::Debug for CoreAffinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries((0..self.core_count).filter(|&core| self.is_set(core)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Attribute list
// ---------------------------------------------------------------------------

/// One thread descriptor: policy, affinity, priority, name.
pub struct ThreadAttr {
    core_affinity: CoreAffinity,
    scheduling_policy: SchedulingPolicy,
    priority: i32,
    name: *mut u8,
}

impl ThreadAttr {
    pub fn core_affinity(&self) -> &CoreAffinity {
        &self.core_affinity
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        self.scheduling_policy
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn name(&self) -> &str {
        if self.name.is_null() {
            return "";
        }
        // SAFETY: name is an owned nul-terminated UTF-8 string.
        unsafe { owned_str(self.name) }
    }
}

/// Growable list of thread descriptors.
pub struct ThreadAttrs {
    attributes: *mut ThreadAttr,
    num_attributes: usize,
    capacity_attributes: usize,
    allocator: AllocHandle,
}

// SAFETY: the list exclusively owns its descriptors.
unsafe impl Send for ThreadAttrs {}

impl ThreadAttrs {
    /// A zero-initialized list; `fini` on it is a no-op.
    pub const fn zeroed() -> Self {
        ThreadAttrs {
            attributes: std::ptr::null_mut(),
            num_attributes: 0,
            capacity_attributes: 0,
            allocator: AllocHandle::default_allocator(),
        }
    }

    /// An empty list that grows on first append.
    pub fn init(allocator: &AllocHandle) -> crate::Result<Self> {
        Self::init_with_capacity(allocator, 0)
    }

    /// An empty list pre-sized for `capacity` descriptors.
    pub fn init_with_capacity(allocator: &AllocHandle, capacity: usize) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if !allocator.is_valid() {
            crate::set_error_msg!("thread attributes initialization failed: invalid allocator");
            return Err(ErrorKind::InvalidArgument);
        }
        let mut attrs = ThreadAttrs::zeroed();
        attrs.allocator = allocator.clone();
        if capacity > 0 {
            attrs.attributes = allocator
                .zero_allocate(capacity, std::mem::size_of::<ThreadAttr>())
                .cast();
            if attrs.attributes.is_null() {
                crate::set_error_msg!("failed to allocate memory for thread attributes");
                return Err(ErrorKind::BadAlloc);
            }
            attrs.capacity_attributes = capacity;
        }
        Ok(attrs)
    }

    /// Release every descriptor and the list storage.
    pub fn fini(&mut self) -> crate::Result {
        if self.attributes.is_null() {
            self.num_attributes = 0;
            self.capacity_attributes = 0;
            return Ok(());
        }
        for i in 0..self.num_attributes {
            // SAFETY: the first num_attributes slots hold live descriptors.
            unsafe {
                let attr = &mut *self.attributes.add(i);
                self.allocator.deallocate(attr.name);
                attr.name = std::ptr::null_mut();
                let _ = attr.core_affinity.fini();
            }
        }
        // SAFETY: the slot array came from self.allocator.
        unsafe { self.allocator.deallocate(self.attributes.cast()) };
        self.attributes = std::ptr::null_mut();
        self.num_attributes = 0;
        self.capacity_attributes = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.num_attributes
    }

    pub fn is_empty(&self) -> bool {
        self.num_attributes == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity_attributes
    }

    /// The descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<&ThreadAttr> {
        if index >= self.num_attributes {
            return None;
        }
        // SAFETY: index < num_attributes.
        Some(unsafe { &*self.attributes.add(index) })
    }

    /// Iterate over the descriptors.
    pub fn iter(&self) -> impl Iterator<Item = &ThreadAttr> {
        (0..self.num_attributes).map(move |i| {
            // SAFETY: i < num_attributes.
            unsafe { &*self.attributes.add(i) }
        })
    }

    fn extend_capacity(&mut self, new_capacity: usize) -> crate::Result {
        let new_size = new_capacity * std::mem::size_of::<ThreadAttr>();
        // SAFETY: attributes is null or owned; on failure the old buffer
        // stays.
        let new_attrs: *mut ThreadAttr =
            unsafe { self.allocator.reallocate(self.attributes.cast(), new_size) }.cast();
        if new_attrs.is_null() {
            crate::set_error_msg!("failed to allocate memory for thread attributes");
            return Err(ErrorKind::BadAlloc);
        }
        self.attributes = new_attrs;
        self.capacity_attributes = new_capacity;
        Ok(())
    }

    /// Append a descriptor; the affinity set and name are copied in.
    pub fn add_attr(
        &mut self,
        scheduling_policy: SchedulingPolicy,
        core_affinity: &CoreAffinity,
        priority: i32,
        name: &str,
    ) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        if self.num_attributes == self.capacity_attributes {
            let new_capacity = if self.capacity_attributes == 0 {
                1
            } else {
                self.capacity_attributes * 2
            };
            self.extend_capacity(new_capacity)?;
        }

        let mut affinity_copy = CoreAffinity::zeroed();
        core_affinity.copy_into(&mut affinity_copy)?;
        let name_copy = self.allocator.alloc_string(name);
        if name_copy.is_null() {
            crate::set_error_msg!("failed to allocate memory for thread attribute name");
            return Err(ErrorKind::BadAlloc);
        }

        // SAFETY: num_attributes < capacity after the growth check; the
        // slot is written before the counter exposes it.
        unsafe {
            self.attributes.add(self.num_attributes).write(ThreadAttr {
                core_affinity: affinity_copy,
                scheduling_policy,
                priority,
                name: name_copy,
            });
        }
        self.num_attributes += 1;
        Ok(())
    }

    /// Copy every descriptor of `self` into `destination`.
    pub fn copy_into(&self, destination: &mut ThreadAttrs) -> crate::Result {
        maybe_return_error!(Err(ErrorKind::BadAlloc));
        for attr in self.iter() {
            destination.add_attr(
                attr.scheduling_policy,
                &attr.core_affinity,
                attr.priority,
                attr.name(),
            )?;
        }
        Ok(())
    }
}

impl Drop for ThreadAttrs {
    fn drop(&mut self) {
        let _ = self.fini();
    }
}

impl std::fmt::Debug for ThreadAttrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for attr in self.iter() {
            list.entry(&(attr.name(), attr.scheduling_policy, attr.priority));
        }
        list.finish()
    }
}

// ---------------------------------------------------------------------------
// Declarative JSON form
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ThreadAttrDoc {
    #[serde(default)]
    thread_attributes: Vec<ThreadAttrEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadAttrEntry {
    name: String,
    #[serde(default = "default_policy")]
    scheduling_policy: SchedulingPolicy,
    #[serde(default)]
    priority: i32,
    /// Logical core numbers the thread may run on.
    #[serde(default)]
    core_affinity: Vec<usize>,
}

fn default_policy() -> SchedulingPolicy {
    SchedulingPolicy::Unknown
}

/// Build a [`ThreadAttrs`] from its JSON document form.
///
/// The document is an object with a `thread_attributes` array; each entry
/// carries `name`, optional `scheduling_policy` (snake_case policy name),
/// optional `priority`, and an optional `core_affinity` core list.
pub fn thread_attrs_from_json(document: &str, allocator: &AllocHandle) -> crate::Result<ThreadAttrs> {
    let doc: ThreadAttrDoc = match serde_json::from_str(document) {
        Ok(doc) => doc,
        Err(err) => {
            crate::set_error_fmt!("failed to parse thread attribute document: {}", err);
            return Err(ErrorKind::InvalidArgument);
        }
    };
    let mut attrs = ThreadAttrs::init_with_capacity(allocator, doc.thread_attributes.len().max(1))?;
    for entry in &doc.thread_attributes {
        let mut affinity = CoreAffinity::init(allocator)?;
        for &core in &entry.core_affinity {
            affinity.set_core(core)?;
        }
        attrs.add_attr(entry.scheduling_policy, &affinity, entry.priority, &entry.name)?;
    }
    Ok(attrs)
}

/// Serialize a [`ThreadAttrs`] into its JSON document form.
pub fn thread_attrs_to_json(attrs: &ThreadAttrs) -> crate::Result<String> {
    let doc = ThreadAttrDoc {
        thread_attributes: attrs
            .iter()
            .map(|attr| ThreadAttrEntry {
                name: attr.name().to_string(),
                scheduling_policy: attr.scheduling_policy(),
                priority: attr.priority(),
                core_affinity: (0..attr.core_affinity().core_count())
                    .filter(|&core| attr.core_affinity().is_set(core))
                    .collect(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).map_err(|err| {
        crate::set_error_fmt!("failed to serialize thread attribute document: {}", err);
        ErrorKind::Error
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc() -> AllocHandle {
        AllocHandle::default_allocator()
    }

    #[test]
    fn zeroed_containers_fini_twice() {
        let mut affinity = CoreAffinity::zeroed();
        assert!(affinity.fini().is_ok());
        assert!(affinity.fini().is_ok());
        let mut attrs = ThreadAttrs::zeroed();
        assert!(attrs.fini().is_ok());
        assert!(attrs.fini().is_ok());
    }

    #[test]
    fn affinity_grows_on_set_in_whole_bytes() {
        let mut affinity = CoreAffinity::init(&alloc()).unwrap();
        assert_eq!(affinity.core_count(), 0);
        affinity.set_core(0).unwrap();
        assert_eq!(affinity.core_count(), 8);
        affinity.set_core(9).unwrap();
        assert_eq!(affinity.core_count(), 16);
        assert!(affinity.is_set(0));
        assert!(affinity.is_set(9));
        assert!(!affinity.is_set(1));
        assert!(!affinity.is_set(100));
    }

    #[test]
    fn affinity_set_unset_round_trip() {
        let mut affinity = CoreAffinity::init_with_capacity(&alloc(), 4).unwrap();
        assert_eq!(affinity.core_count(), 8);
        affinity.set_core(3).unwrap();
        assert!(affinity.is_set(3));
        affinity.unset_core(3).unwrap();
        assert!(!affinity.is_set(3));
        affinity.unset_core(99).unwrap();
    }

    #[test]
    fn affinity_fill_and_clear_are_inclusive() {
        let mut affinity = CoreAffinity::init(&alloc()).unwrap();
        affinity.fill(2, 10).unwrap();
        for core in 2..=10 {
            assert!(affinity.is_set(core));
        }
        assert!(!affinity.is_set(1));
        assert!(!affinity.is_set(11));

        affinity.clear(4, 6).unwrap();
        assert!(affinity.is_set(3));
        assert!(!affinity.is_set(4));
        assert!(!affinity.is_set(6));
        assert!(affinity.is_set(7));

        assert_eq!(affinity.fill(5, 4), Err(ErrorKind::InvalidArgument));
        assert_eq!(affinity.clear(5, 4), Err(ErrorKind::InvalidArgument));
        crate::error::reset_error();
    }

    #[test]
    fn affinity_copy_preserves_bits() {
        let mut affinity = CoreAffinity::init(&alloc()).unwrap();
        affinity.set_core(1).unwrap();
        affinity.set_core(12).unwrap();
        let mut copy = CoreAffinity::zeroed();
        affinity.copy_into(&mut copy).unwrap();
        assert_eq!(copy.core_count(), affinity.core_count());
        assert!(copy.is_set(1));
        assert!(copy.is_set(12));
        assert!(!copy.is_set(2));
    }

    #[test]
    fn attrs_append_doubles_capacity_from_one() {
        let mut attrs = ThreadAttrs::init(&alloc()).unwrap();
        let affinity = CoreAffinity::init(&alloc()).unwrap();
        attrs.add_attr(SchedulingPolicy::Fifo, &affinity, 10, "worker-a").unwrap();
        assert_eq!((attrs.len(), attrs.capacity()), (1, 1));
        attrs.add_attr(SchedulingPolicy::Rr, &affinity, 20, "worker-b").unwrap();
        assert_eq!((attrs.len(), attrs.capacity()), (2, 2));
        attrs.add_attr(SchedulingPolicy::Other, &affinity, 0, "worker-c").unwrap();
        assert_eq!((attrs.len(), attrs.capacity()), (3, 4));

        let attr = attrs.get(1).unwrap();
        assert_eq!(attr.scheduling_policy(), SchedulingPolicy::Rr);
        assert_eq!(attr.priority(), 20);
        assert_eq!(attr.name(), "worker-b");
        assert!(attrs.get(3).is_none());
    }

    #[test]
    fn attrs_copy_into_replicates() {
        let mut attrs = ThreadAttrs::init(&alloc()).unwrap();
        let mut affinity = CoreAffinity::init(&alloc()).unwrap();
        affinity.set_core(2).unwrap();
        attrs.add_attr(SchedulingPolicy::Deadline, &affinity, 5, "rt").unwrap();

        let mut copy = ThreadAttrs::init(&alloc()).unwrap();
        attrs.copy_into(&mut copy).unwrap();
        assert_eq!(copy.len(), 1);
        let attr = copy.get(0).unwrap();
        assert_eq!(attr.name(), "rt");
        assert!(attr.core_affinity().is_set(2));
    }

    #[test]
    fn json_document_round_trip() {
        let document = r#"{
            "thread_attributes": [
                {
                    "name": "transport",
                    "scheduling_policy": "fifo",
                    "priority": 30,
                    "core_affinity": [0, 1]
                },
                { "name": "background" }
            ]
        }"#;
        let attrs = thread_attrs_from_json(document, &alloc()).unwrap();
        assert_eq!(attrs.len(), 2);
        let transport = attrs.get(0).unwrap();
        assert_eq!(transport.scheduling_policy(), SchedulingPolicy::Fifo);
        assert_eq!(transport.priority(), 30);
        assert!(transport.core_affinity().is_set(0));
        assert!(transport.core_affinity().is_set(1));
        assert!(!transport.core_affinity().is_set(2));
        let background = attrs.get(1).unwrap();
        assert_eq!(background.scheduling_policy(), SchedulingPolicy::Unknown);
        assert_eq!(background.priority(), 0);

        let json = thread_attrs_to_json(&attrs).unwrap();
        let reparsed = thread_attrs_from_json(&json, &alloc()).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed.get(0).unwrap().name(), "transport");
    }

    #[test]
    fn malformed_json_is_invalid_argument() {
        assert_eq!(
            thread_attrs_from_json("{ not json", &alloc()).err(),
            Some(ErrorKind::InvalidArgument)
        );
        crate::error::reset_error();
    }
}
