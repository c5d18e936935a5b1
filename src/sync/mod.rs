//! Synchronization primitives.
//!
//! Provides thin wrappers over std or parking_lot locks, atomic statistics
//! cells, and the maintenance shutdown signal.

pub(crate) mod atomics;
pub(crate) mod mutex;
pub(crate) mod signal;
