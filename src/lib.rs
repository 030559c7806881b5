//! Heap leak detection engine: correlates allocation, stack-capture, and
//! free trace events into a concurrently-queryable table of call-stack
//! counters, ranked by outstanding allocations.

pub mod config;
pub mod correlate;
pub mod report;
pub mod session;
pub mod store;
pub mod trace;
