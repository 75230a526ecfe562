//! Containers whose memory discipline runs through the allocator contract.
//!
//! Every container here stores the [`AllocHandle`](crate::allocator::AllocHandle)
//! it was created with and uses it for all growth and teardown. All of
//! them share the scoped-acquisition rules: `init` pairs with `fini`,
//! `fini` is idempotent, and a zero-initialized container tears down as a
//! no-op. `Drop` implementations call `fini` so the discipline holds even
//! on early returns.

pub mod array_list;
pub mod byte_array;
pub mod char_array;
pub mod hash_map;
pub mod string_array;
pub mod string_map;

pub use array_list::ArrayList;
pub use byte_array::ByteArray;
pub use char_array::CharArray;
pub use hash_map::{HashMap, StrPtr, blob_eq, blob_hash, string_eq, string_hash};
pub use string_array::StringArray;
pub use string_map::StringMap;
