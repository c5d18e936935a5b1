//! The main allocator type.

use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use log::info;

use crate::allocators::numa::BalanceReport;
use crate::allocators::pool::PoolStrategy;
use crate::api::config::AllocConfig;
use crate::api::error::AllocResult;
use crate::api::flags::AllocFlags;
use crate::api::stats::{AllocStats, AllocationInfo, CacheRegionSnapshot, NumaNodeSnapshot, PoolSnapshot};
use crate::core::state::{AllocatorState, Route, DEFAULT_ALIGN};
use crate::link::LinkState;
use crate::maintenance::{self, MaintenanceScheduler, MaintenanceTask};
use crate::prefetch::{HotSpot, Locality, PrefetchHint};
use crate::sync::mutex::Mutex;

/// The tiered allocator.
///
/// Cheap to clone (internally uses `Arc`) and thread-safe. The allocator
/// shuts down when [`shutdown`](Self::shutdown) is called or the last
/// clone is dropped; background threads are joined either way.
///
/// # Example
///
/// ```rust,no_run
/// use tieralloc::{AllocConfig, AllocFlags, TieredAlloc};
///
/// let alloc = TieredAlloc::initialize(AllocConfig::default()).unwrap();
///
/// let ptr = alloc.allocate(4000, 64, AllocFlags::NONE);
/// assert!(!ptr.is_null());
/// alloc.deallocate(ptr);
/// alloc.shutdown();
/// ```
#[derive(Clone)]
pub struct TieredAlloc {
    inner: Arc<Inner>,
}

struct Inner {
    state: Arc<AllocatorState>,
    scheduler: Mutex<Option<MaintenanceScheduler>>,
}

impl Inner {
    fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if !self.state.is_active() && scheduler.is_none() {
            return;
        }
        self.state.signal().trigger();
        if let Some(scheduler) = scheduler {
            scheduler.join();
        }
        info!("tieralloc shut down");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TieredAlloc {
    /// Build every tier and, if configured, start the maintenance threads.
    pub fn initialize(config: AllocConfig) -> AllocResult<Self> {
        let background = config.enable_background_maintenance;
        let state = Arc::new(AllocatorState::new(config)?);
        let scheduler = background.then(|| MaintenanceScheduler::start(&state));
        Ok(Self {
            inner: Arc::new(Inner {
                state,
                scheduler: Mutex::new(scheduler),
            }),
        })
    }

    /// Create an allocator with default configuration.
    pub fn with_defaults() -> AllocResult<Self> {
        Self::initialize(AllocConfig::default())
    }

    /// Stop and join the maintenance threads. Later allocations fail with
    /// [`AllocError::ShutDown`](crate::AllocError::ShutDown); frees still work.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.is_active()
    }

    pub fn config(&self) -> &AllocConfig {
        self.inner.state.config()
    }

    fn state(&self) -> &AllocatorState {
        &self.inner.state
    }

    // ==================== Allocation ====================

    /// Allocate `size` bytes. Returns null on failure.
    pub fn allocate(&self, size: usize, alignment: usize, flags: AllocFlags) -> *mut u8 {
        self.try_allocate(size, alignment, flags)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Allocate `size` bytes, routed by `flags`.
    pub fn try_allocate(&self, size: usize, alignment: usize, flags: AllocFlags) -> AllocResult<NonNull<u8>> {
        self.state().allocate(size, alignment, flags, Route::from_flags(flags))
    }

    /// Free a block. Null and unknown pointers are ignored.
    pub fn deallocate(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            let _ = self.state().deallocate(ptr as usize);
        }
    }

    /// Free a block, returning its requested size.
    pub fn try_deallocate(&self, ptr: *mut u8) -> AllocResult<usize> {
        self.state().deallocate(ptr as usize)
    }

    /// Resize a block, moving it if it has no room. Null allocates.
    /// Returns null on failure, in which case the old block is untouched.
    pub fn reallocate(&self, ptr: *mut u8, new_size: usize, alignment: usize, flags: AllocFlags) -> *mut u8 {
        self.try_reallocate(ptr, new_size, alignment, flags)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn try_reallocate(
        &self,
        ptr: *mut u8,
        new_size: usize,
        alignment: usize,
        flags: AllocFlags,
    ) -> AllocResult<NonNull<u8>> {
        if ptr.is_null() {
            return self.try_allocate(new_size, alignment, flags);
        }
        self.state().reallocate(ptr as usize, new_size, alignment, flags)
    }

    /// Allocate on `node`; unknown nodes fall back to the first node.
    pub fn allocate_numa_local(&self, size: usize, node: usize, alignment: usize) -> *mut u8 {
        self.try_allocate_numa_local(size, node, alignment)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn try_allocate_numa_local(&self, size: usize, node: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        self.state()
            .allocate(size, alignment, AllocFlags::NUMA_LOCAL, Route::Numa(Some(node)))
    }

    /// Allocate on a cache-line boundary, falling back to a line-aligned
    /// heap block when the cache regions are full.
    pub fn allocate_cache_aligned(&self, size: usize, alignment: usize) -> *mut u8 {
        self.try_allocate_cache_aligned(size, alignment)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn try_allocate_cache_aligned(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        self.state()
            .allocate(size, alignment, AllocFlags::CACHE_ALIGNED, Route::Cache)
    }

    /// Allocate from the pool ladder only. Never falls back to the heap.
    pub fn allocate_from_pool(&self, size: usize, strategy: PoolStrategy) -> *mut u8 {
        self.try_allocate_from_pool(size, strategy)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn try_allocate_from_pool(&self, size: usize, strategy: PoolStrategy) -> AllocResult<NonNull<u8>> {
        self.state()
            .allocate(size, DEFAULT_ALIGN, AllocFlags::NO_FALLBACK, Route::Pool(strategy))
    }

    // ==================== Linked Blocks ====================

    /// Pair two live allocations. Both must currently be unlinked.
    pub fn link(&self, a: *mut u8, b: *mut u8) -> AllocResult<()> {
        self.state().link(a as usize, b as usize)
    }

    /// Break the pair containing `ptr`; both sides become `Free`.
    pub fn unlink(&self, ptr: *mut u8) -> AllocResult<()> {
        self.state().unlink(ptr as usize).map(drop)
    }

    /// Record an access through the link, decaying its strength.
    pub fn access_link(&self, ptr: *mut u8) -> AllocResult<LinkState> {
        self.state().access_link(ptr as usize)
    }

    /// Revive an expired pair.
    pub fn restore_link(&self, ptr: *mut u8) -> AllocResult<LinkState> {
        self.state().restore_link(ptr as usize)
    }

    pub fn get_link_state(&self, ptr: *mut u8) -> LinkState {
        self.state().link_state(ptr as usize)
    }

    pub fn measure_link_strength(&self, ptr: *mut u8) -> f64 {
        self.state().link_strength(ptr as usize)
    }

    pub fn link_partner(&self, ptr: *mut u8) -> Option<*mut u8> {
        self.state().link_partner(ptr as usize).map(|a| a as *mut u8)
    }

    // ==================== Prefetch ====================

    /// Ask for `ptr + offset` to be prefetched on every prefetch tick.
    pub fn add_prefetch_hint(&self, ptr: *const u8, offset: isize, locality: Locality) {
        self.state().add_prefetch_hint(ptr as usize, offset, locality);
    }

    pub fn remove_prefetch_hint(&self, ptr: *const u8) -> bool {
        self.state().remove_prefetch_hint(ptr as usize)
    }

    /// Report an access. Never blocks; folded in on the next prefetch tick.
    pub fn record_access(&self, ptr: *const u8) {
        self.state().record_access(ptr as usize);
    }

    pub fn hotspots(&self) -> Vec<HotSpot> {
        self.state().hotspots()
    }

    pub fn prefetch_hints(&self) -> Vec<PrefetchHint> {
        self.state().prefetch_hints()
    }

    // ==================== Statistics ====================

    /// Get current allocation statistics.
    pub fn get_statistics(&self) -> AllocStats {
        self.state().statistics()
    }

    pub fn reset_statistics(&self) {
        self.state().reset_statistics();
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.state().pool_snapshots()
    }

    pub fn numa_nodes(&self) -> Vec<NumaNodeSnapshot> {
        self.state().numa_nodes()
    }

    pub fn cache_regions(&self) -> Vec<CacheRegionSnapshot> {
        self.state().cache_regions()
    }

    pub fn get_numa_node(&self, ptr: *const u8) -> Option<usize> {
        self.state().numa_node_of(ptr as usize)
    }

    pub fn get_allocation_size(&self, ptr: *const u8) -> Option<usize> {
        self.state().allocation_size(ptr as usize)
    }

    pub fn allocation_info(&self, ptr: *const u8) -> Option<AllocationInfo> {
        self.state().allocation_info(ptr as usize)
    }

    /// Every live allocation, ordered by address.
    pub fn allocations(&self) -> Vec<AllocationInfo> {
        self.state().allocations()
    }

    // ==================== Maintenance ====================

    /// Enter or leave low-memory mode. Entering releases half the free
    /// pool pages; while active, compaction frees stale allocations.
    pub fn enable_low_memory_mode(&self, enable: bool) {
        self.state().set_low_memory_mode(enable);
    }

    /// Run a compaction pass now. Returns the fragmentation ratio.
    pub fn compact(&self) -> f64 {
        self.state().compact()
    }

    pub fn balance_numa(&self) -> BalanceReport {
        self.state().balance_numa()
    }

    /// Write a text dump of pools, nodes, cache regions, links and live
    /// allocations to `path`.
    pub fn dump_memory_map(&self, path: impl AsRef<Path>) -> AllocResult<()> {
        self.state().dump_memory_map(path.as_ref())
    }

    /// Run one pass of `task` on the calling thread. Link decay advances
    /// by one `link_decay_interval`.
    pub fn run_maintenance(&self, task: MaintenanceTask) {
        maintenance::run_pass(self.state(), task, self.config().link_decay_interval);
    }

    /// Tasks with a running background thread.
    pub fn running_maintenance(&self) -> Vec<MaintenanceTask> {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .map_or_else(Vec::new, MaintenanceScheduler::running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::AllocError;
    use crate::diagnostics;

    fn alloc() -> TieredAlloc {
        diagnostics::suppress_diagnostics(true);
        TieredAlloc::initialize(AllocConfig::minimal().with_numa(false)).unwrap()
    }

    #[test]
    fn test_null_wrappers() {
        let alloc = alloc();
        alloc.deallocate(ptr::null_mut());
        assert!(alloc.allocate(64, 3, AllocFlags::NONE).is_null());
        assert!(matches!(
            alloc.try_allocate(64, 3, AllocFlags::NONE),
            Err(AllocError::InvalidAlignment { alignment: 3 })
        ));

        let p = alloc.reallocate(ptr::null_mut(), 128, 16, AllocFlags::NONE);
        assert!(!p.is_null());
        assert_eq!(alloc.get_allocation_size(p), Some(128));
        alloc.deallocate(p);
    }

    #[test]
    fn test_flags_pick_tier() {
        use crate::api::stats::AllocTier;

        let alloc = alloc();
        let cached = alloc.allocate(100, 16, AllocFlags::CACHE_ALIGNED | AllocFlags::NUMA_LOCAL);
        assert_eq!(alloc.allocation_info(cached).unwrap().tier, AllocTier::Cache);
        assert_eq!(cached as usize % 64, 0);

        let numa = alloc.allocate(100, 16, AllocFlags::NUMA_LOCAL);
        assert_eq!(alloc.allocation_info(numa).unwrap().tier, AllocTier::Numa);

        let zeroed = alloc.allocate(100, 16, AllocFlags::ZEROED);
        let bytes = unsafe { std::slice::from_raw_parts(zeroed, 100) };
        assert!(bytes.iter().all(|&b| b == 0));

        for p in [cached, numa, zeroed] {
            alloc.deallocate(p);
        }
        assert_eq!(alloc.get_statistics().current_usage, 0);
    }

    #[test]
    fn test_prefetch_flag_registers_hint() {
        let alloc = alloc();
        let p = alloc.allocate(256, 16, AllocFlags::PREFETCH);
        let hints = alloc.prefetch_hints();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].base_address, p as usize);
        alloc.deallocate(p);
        assert!(alloc.prefetch_hints().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let alloc = TieredAlloc::initialize(AllocConfig::minimal().with_numa(false).with_background_maintenance(true))
            .unwrap();
        assert!(!alloc.running_maintenance().is_empty());
        let clone = alloc.clone();
        alloc.shutdown();
        clone.shutdown();
        assert!(!clone.is_active());
        assert!(clone.running_maintenance().is_empty());
        assert!(clone.allocate(16, 16, AllocFlags::NONE).is_null());
    }
}
