//! Deterministic failure-testing support.
//!
//! The only member is the fault-injection counter, a process-wide probe
//! that lets a test harness make the Nth fallible operation in a code path
//! fail on demand.

pub mod fault_injection;
