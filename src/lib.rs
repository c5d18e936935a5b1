//! # tieralloc
//!
//! Concurrent tiered memory allocator with NUMA locality, cache-aware
//! placement, access-pattern prefetching and linked block lifetimes.
//!
//! ## Features
//!
//! - Size-class pools (1 KiB .. 1 GiB) with O(1) allocate and free
//! - System heap fallback for requests no pool can serve
//! - NUMA-bound allocations with periodic load balancing and hot-page migration
//! - Cache-line aligned regions sized to L1/L2/L3
//! - Hotspot detection and hardware prefetch hints
//! - Linked block pairs with decaying strength and a coherence window
//! - Four background maintenance threads (compaction, link decay,
//!   prefetch, NUMA balance)
//! - Lock-free statistics and coded diagnostics through `log`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tieralloc::{AllocConfig, AllocFlags, TieredAlloc};
//!
//! let alloc = TieredAlloc::initialize(AllocConfig::default()).unwrap();
//!
//! let a = alloc.allocate(4000, 64, AllocFlags::NONE);
//! let b = alloc.allocate_cache_aligned(256, 64);
//! alloc.link(a, b).unwrap();
//! alloc.access_link(a).unwrap();
//!
//! println!("{}", alloc.get_statistics());
//! alloc.deallocate(a);
//! alloc.deallocate(b);
//! alloc.shutdown();
//! ```

#[allow(dead_code)]
pub mod api;
#[allow(dead_code)]
pub mod diagnostics;
mod maintenance;

#[allow(dead_code)]
mod allocators;
#[allow(dead_code)]
mod core;
mod link;
#[allow(dead_code)]
mod prefetch;
#[allow(dead_code)]
mod sync;
#[allow(dead_code)]
mod util;

#[cfg(feature = "debug")]
pub mod debug;

// Re-export public API at crate root for convenience
pub use api::alloc::TieredAlloc;
pub use api::config::AllocConfig;
pub use api::error::{AllocError, AllocResult};
pub use api::flags::AllocFlags;
pub use api::stats::{
    AllocStats, AllocTier, AllocationInfo, CacheRegionSnapshot, LinkHealth, NumaNodeSnapshot,
    PoolSnapshot,
};

// Tiers
pub use allocators::cache::CacheLevel;
pub use allocators::numa::BalanceReport;
pub use allocators::pool::PoolStrategy;

// Linked blocks
pub use link::LinkState;

// Prefetch
pub use prefetch::{AccessPattern, HotSpot, Locality, PrefetchHint};

// Maintenance
pub use maintenance::MaintenanceTask;

// Diagnostics - core types and predefined codes
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink};
pub use diagnostics::{install_sink, clear_sink, suppress_diagnostics};
pub use diagnostics::{TA001, TA002, TA003, TA004, TA101, TA102, TA103, TA201, TA301, TA302, TA303, TA901};
