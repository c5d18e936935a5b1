//! Allocation backends.
//!
//! This module contains the tier implementations.
//! **These are the only modules that map, bind or release raw memory.**

pub(crate) mod cache;
pub(crate) mod heap;
pub(crate) mod numa;
pub(crate) mod pool;
pub(crate) mod region;
