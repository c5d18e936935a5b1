//! Public API for tieralloc.
//!
//! This module contains all user-facing types and functions.
//! Most users should only interact with [`TieredAlloc`](alloc::TieredAlloc)
//! and [`AllocConfig`](config::AllocConfig).

pub mod alloc;
pub mod config;
pub mod error;
pub mod flags;
pub mod stats;
