//! Allocator internals shared by the facade and the maintenance threads.

pub(crate) mod state;
pub(crate) mod stats;
