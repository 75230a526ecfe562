//! # groundwork-core
//!
//! Runtime foundation for a middleware stack: the primitives every higher
//! layer assumes are present.
//!
//! ## Architecture
//!
//! 1. A pluggable [allocator contract](allocator) — every owning container
//!    and the logger go through an [`AllocHandle`].
//! 2. [Thread-local error state](error) — fallible operations return a
//!    status code and record a structured message for the calling thread.
//! 3. [Containers](types) whose memory discipline is driven by the
//!    allocator contract: string map, generic hash map, array list,
//!    char/byte arrays, string array.
//! 4. A [multi-source clock](time) — system, steady, and overridable ROS
//!    time with change-notification callbacks.
//! 5. A [hierarchical logger](logging) — dotted names, severity
//!    resolution, compiled format templates, a replaceable sink, and
//!    call-site conditional macros.
//! 6. A [fault-injection counter](testing::fault_injection) for
//!    deterministic failure testing across all of the above.
//! 7. A [thread-attribute container](thread_attr) describing scheduling
//!    policy, priority, and core affinity for an executor to apply.
//!
//! Dependency order is bottom-up: the allocator knows nothing of errors,
//! the error layer never allocates, and the logger sits on top of both
//! plus the clock.
//!
//! ## Quick start
//!
//! ```no_run
//! use groundwork_core::logging::Severity;
//!
//! groundwork_core::logging::initialize().unwrap();
//! groundwork_core::logging::set_logger_level("transport", Severity::Debug).unwrap();
//!
//! groundwork_core::log_debug_named!("transport.tcp", "connected in {} ms", 12);
//! ```

pub mod allocator;
pub mod env;
pub mod error;
pub mod logging;
pub mod testing;
pub mod thread_attr;
pub mod time;
pub mod types;

pub use allocator::{AllocHandle, Allocator, DefaultAllocator, RawAllocator};
pub use error::{
    ErrorKind, ErrorState, ErrorString, error_is_set, get_error_state, get_error_string,
    reset_error,
};
pub use logging::{LogLocation, OutputHandler, Severity};
pub use time::{ClockKind, ClockSource, TimeDuration, TimePoint};

/// Result alias used by every fallible operation in this crate.
pub type Result<T = ()> = std::result::Result<T, error::ErrorKind>;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
