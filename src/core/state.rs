//! Shared allocator state.
//!
//! Everything the facade and the maintenance threads touch lives here,
//! behind one lock per concern. Locks are always taken in the order
//! table, links, numa, cache, prefetch.

use std::alloc::Layout;
use std::collections::BTreeMap;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{compiler_fence, Ordering};
use std::thread;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::allocators::cache::{CacheGeometry, CacheRegionAllocator};
use crate::allocators::heap::SystemHeap;
use crate::allocators::numa::{BalanceReport, NumaManager};
use crate::allocators::pool::{PoolLadder, PoolStrategy};
use crate::allocators::region::Region;
use crate::api::config::AllocConfig;
use crate::api::error::{AllocError, AllocResult};
use crate::api::flags::AllocFlags;
use crate::api::stats::{
    AllocStats, AllocTier, AllocationInfo, CacheRegionSnapshot, NumaNodeSnapshot, PoolSnapshot,
};
use crate::core::stats::StatsCollector;
use crate::diagnostics;
use crate::diagnostics::memory_map::MemoryMap;
use crate::link::{DecayReport, LinkState, LinkTable};
use crate::prefetch::{AccessQueue, HotSpot, Locality, PrefetchEngine, PrefetchHint, TickReport};
use crate::sync::mutex::{Mutex, RwLock};
use crate::sync::signal::ShutdownSignal;
use crate::util::layout::{align_up, check_alignment, heap_layout, MIN_ALIGN};
use crate::util::size::format_bytes;

/// Hotspots hotter than this are migrated off overloaded nodes.
const MIGRATION_TEMPERATURE: f64 = 0.8;

/// Alignment for requests that do not name one.
pub(crate) const DEFAULT_ALIGN: usize = MIN_ALIGN;

/// Where a request should be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Pool(PoolStrategy),
    /// `None` picks the calling thread's node.
    Numa(Option<usize>),
    Cache,
}

impl Route {
    /// Route implied by allocation flags. `CACHE_ALIGNED` wins over `NUMA_LOCAL`.
    pub(crate) fn from_flags(flags: AllocFlags) -> Self {
        if flags.contains(AllocFlags::CACHE_ALIGNED) {
            Route::Cache
        } else if flags.contains(AllocFlags::NUMA_LOCAL) {
            Route::Numa(None)
        } else {
            Route::Pool(PoolStrategy::NextAvailable)
        }
    }
}

/// Tier that owns the memory behind a record.
#[derive(Debug)]
enum AllocSource {
    Pool { class: usize },
    Heap { layout: Layout },
    Numa { region: Region },
    Cache { region: usize },
}

impl AllocSource {
    fn tier(&self) -> AllocTier {
        match self {
            AllocSource::Pool { .. } => AllocTier::Pool,
            AllocSource::Heap { .. } => AllocTier::Heap,
            AllocSource::Numa { .. } => AllocTier::Numa,
            AllocSource::Cache { .. } => AllocTier::Cache,
        }
    }
}

#[derive(Debug)]
struct AllocationRecord {
    /// Distinguishes successive records at the same address.
    id: u64,
    address: usize,
    size: usize,
    capacity: usize,
    alignment: usize,
    flags: AllocFlags,
    numa_node: usize,
    created: Instant,
    source: AllocSource,
}

impl AllocationRecord {
    fn info(&self, linked_partner: Option<usize>) -> AllocationInfo {
        AllocationInfo {
            address: self.address,
            size: self.size,
            capacity: self.capacity,
            alignment: self.alignment,
            flags: self.flags,
            numa_node: self.numa_node,
            tier: self.source.tier(),
            age: self.created.elapsed(),
            linked_partner,
        }
    }
}

/// Memory a tier handed out, before it is recorded.
struct Placement {
    address: usize,
    capacity: usize,
    numa_node: usize,
    source: AllocSource,
}

/// Live allocations plus the pool metadata they index into.
struct AllocTable {
    records: BTreeMap<usize, AllocationRecord>,
    pools: PoolLadder,
    next_id: u64,
}

impl AllocTable {
    /// Allocation whose `[address, address + size)` contains `addr`.
    fn containing(&self, addr: usize) -> Option<(usize, usize)> {
        let (_, record) = self.records.range(..=addr).next_back()?;
        (addr < record.address + record.size.max(1)).then_some((record.address, record.size))
    }
}

/// State shared by the facade and the maintenance threads.
pub struct AllocatorState {
    config: AllocConfig,
    table: RwLock<AllocTable>,
    links: Mutex<LinkTable>,
    numa: Mutex<NumaManager>,
    cache: Mutex<CacheRegionAllocator>,
    prefetch: Mutex<PrefetchEngine>,
    accesses: AccessQueue,
    heap: SystemHeap,
    stats: StatsCollector,
    signal: ShutdownSignal,
    line_size: usize,
}

impl AllocatorState {
    /// Validate the configuration and build every tier.
    pub fn new(config: AllocConfig) -> AllocResult<Self> {
        config.validate()?;
        if config.enable_compression {
            diagnostics::emit(&diagnostics::TA004);
        }

        let numa = NumaManager::detect(config.enable_numa);
        let pool_node = numa.is_multi_node().then(|| numa.current_node());
        let pools = PoolLadder::new(&config, pool_node);
        if pools.is_empty() {
            warn!("no pool size class could be created; every request will use the heap");
        }
        let cache = CacheRegionAllocator::new(CacheGeometry::detect());
        let line_size = cache.line_size();

        info!(
            "tieralloc ready: {} pool class(es), {} NUMA node(s){}, {} byte lines",
            pools.len(),
            numa.node_count(),
            if numa.is_supported() { "" } else { " (unbound)" },
            line_size
        );

        Ok(Self {
            links: Mutex::new(LinkTable::new(
                config.link_decay_rate,
                config.coherence_window_ms,
                config.interference_factor,
            )),
            prefetch: Mutex::new(PrefetchEngine::new(config.hotspot_threshold, config.enable_prefetch)),
            table: RwLock::new(AllocTable {
                records: BTreeMap::new(),
                pools,
                next_id: 0,
            }),
            numa: Mutex::new(numa),
            cache: Mutex::new(cache),
            accesses: AccessQueue::new(),
            heap: SystemHeap::new(),
            stats: StatsCollector::new(),
            signal: ShutdownSignal::new(),
            line_size,
            config,
        })
    }

    pub fn config(&self) -> &AllocConfig {
        &self.config
    }

    pub(crate) fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn is_active(&self) -> bool {
        self.signal.is_active()
    }

    pub fn numa_node_count(&self) -> usize {
        self.numa.lock().node_count()
    }

    // ---- allocation ----

    /// Allocate along `route`, retrying with compaction while memory is short.
    ///
    /// Backoff grows linearly with the attempt number and is capped, so a
    /// failing request waits at most `retries * retry_backoff_cap`.
    pub(crate) fn allocate(
        &self,
        size: usize,
        alignment: usize,
        flags: AllocFlags,
        route: Route,
    ) -> AllocResult<NonNull<u8>> {
        self.allocate_tracked(size, alignment, flags, route).map(|(ptr, _)| ptr)
    }

    /// [`allocate`](Self::allocate), also returning the new record's id.
    fn allocate_tracked(
        &self,
        size: usize,
        alignment: usize,
        flags: AllocFlags,
        route: Route,
    ) -> AllocResult<(NonNull<u8>, u64)> {
        if !self.signal.is_active() {
            return Err(AllocError::ShutDown);
        }
        let alignment = check_alignment(alignment)?;

        let mut attempt = 0u32;
        loop {
            match self.place_and_record(size, alignment, flags, route) {
                Ok(placed) => return Ok(placed),
                Err(AllocError::OutOfMemory { .. }) if attempt < self.config.max_allocation_retries => {
                    attempt += 1;
                    let delay = (self.config.retry_backoff * attempt).min(self.config.retry_backoff_cap);
                    trace!("allocation of {} bytes failed, retry {} in {:?}", size, attempt, delay);
                    thread::sleep(delay);
                    // Bookkeeping only: stale reclaim never runs on the allocation path.
                    self.compact_pools(&mut self.table.write());
                }
                Err(err) => {
                    if let AllocError::OutOfMemory { .. } = err {
                        self.stats.record_failure();
                        let context = format!("{} bytes, align {}", size, alignment);
                        if flags.contains(AllocFlags::NO_FALLBACK) {
                            diagnostics::emit_with_context(&diagnostics::TA002, &context);
                        } else {
                            diagnostics::emit_with_context(&diagnostics::TA001, &context);
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    fn place_and_record(
        &self,
        size: usize,
        alignment: usize,
        flags: AllocFlags,
        route: Route,
    ) -> AllocResult<(NonNull<u8>, u64)> {
        let mut table = self.table.write();
        let placement = match route {
            Route::Pool(strategy) => self.place_pooled(&mut table, size, alignment, flags, strategy)?,
            Route::Numa(node) => self.place_numa(size, alignment, node)?,
            Route::Cache => self.place_cache(size, alignment, flags)?,
        };
        let Placement {
            address,
            capacity,
            numa_node,
            source,
        } = placement;

        if flags.contains(AllocFlags::ZEROED) && !matches!(source, AllocSource::Heap { .. } | AllocSource::Numa { .. }) {
            // SAFETY: the tier just handed out at least `capacity >= size` bytes.
            unsafe { std::ptr::write_bytes(address as *mut u8, 0, size) };
        }

        self.numa.lock().record_alloc(numa_node, capacity);
        let id = table.next_id;
        table.next_id += 1;
        table.records.insert(
            address,
            AllocationRecord {
                id,
                address,
                size,
                capacity,
                alignment,
                flags,
                numa_node,
                created: Instant::now(),
                source,
            },
        );
        drop(table);

        self.stats.record_alloc(size);
        if flags.contains(AllocFlags::PREFETCH) {
            self.prefetch
                .lock()
                .add_hint(address, self.line_size as isize, Locality::MODERATE);
        }
        trace!("allocated {} bytes at {:#x} ({:?})", size, address, route);
        let ptr = NonNull::new(address as *mut u8).ok_or(AllocError::OutOfMemory { size })?;
        Ok((ptr, id))
    }

    fn place_pooled(
        &self,
        table: &mut AllocTable,
        size: usize,
        alignment: usize,
        flags: AllocFlags,
        strategy: PoolStrategy,
    ) -> AllocResult<Placement> {
        if let Some((class, address)) = table.pools.allocate(size, alignment, strategy) {
            let pool = table.pools.pool(class);
            return Ok(Placement {
                address,
                capacity: pool.block_size(),
                numa_node: pool.numa_node(),
                source: AllocSource::Pool { class },
            });
        }
        if flags.contains(AllocFlags::NO_FALLBACK) {
            return Err(AllocError::OutOfMemory { size });
        }
        self.place_heap(size, alignment, flags)
    }

    fn place_heap(&self, size: usize, alignment: usize, flags: AllocFlags) -> AllocResult<Placement> {
        let layout = heap_layout(size, alignment)?;
        let ptr = self
            .heap
            .alloc(layout, flags.contains(AllocFlags::ZEROED))
            .ok_or(AllocError::OutOfMemory { size })?;
        self.stats.record_fallback();
        Ok(Placement {
            address: ptr.as_ptr() as usize,
            capacity: layout.size(),
            numa_node: self.numa.lock().current_node(),
            source: AllocSource::Heap { layout },
        })
    }

    fn place_numa(&self, size: usize, alignment: usize, node: Option<usize>) -> AllocResult<Placement> {
        let mut numa = self.numa.lock();
        let node = node.unwrap_or_else(|| numa.current_node());
        let (region, node) = numa.allocate(size, node, alignment)?;
        Ok(Placement {
            address: region.base(),
            capacity: region.len(),
            numa_node: node,
            source: AllocSource::Numa { region },
        })
    }

    fn place_cache(&self, size: usize, alignment: usize, flags: AllocFlags) -> AllocResult<Placement> {
        let alignment = alignment.max(self.line_size);
        let node = self.numa.lock().current_node();
        let placed = self.cache.lock().allocate(size, alignment);
        match placed {
            Some((region, address)) => Ok(Placement {
                address,
                capacity: align_up(size.max(1), self.line_size),
                numa_node: node,
                source: AllocSource::Cache { region },
            }),
            None if flags.contains(AllocFlags::NO_FALLBACK) => Err(AllocError::OutOfMemory { size }),
            None => self.place_heap(size, alignment, flags),
        }
    }

    /// Free a live allocation. Unknown addresses change nothing.
    pub fn deallocate(&self, address: usize) -> AllocResult<usize> {
        let mut table = self.table.write();
        let Some(record) = table.records.remove(&address) else {
            drop(table);
            diagnostics::emit_with_context(&diagnostics::TA003, &format!("{:#x}", address));
            return Err(AllocError::UnknownAddress { address });
        };
        let size = self.release_record(&mut table, record);
        drop(table);

        self.stats.publish_links(self.links.lock().health());
        Ok(size)
    }

    /// Return a record's memory to its tier. The record is already out of
    /// the table. Returns the requested size.
    fn release_record(&self, table: &mut AllocTable, record: AllocationRecord) -> usize {
        let AllocationRecord {
            address,
            size,
            capacity,
            flags,
            numa_node,
            source,
            ..
        } = record;

        self.links.lock().release(address);
        if flags.contains(AllocFlags::SECURE) || self.config.enable_encryption {
            // SAFETY: the record owned `capacity` bytes at `address` until now.
            unsafe { scrub(address, capacity) };
        }
        self.numa.lock().record_free(numa_node, capacity);

        match source {
            AllocSource::Pool { .. } => {
                #[cfg(feature = "debug")]
                {
                    // SAFETY: the block is still mapped and no longer handed out.
                    unsafe { crate::debug::poison::poison_freed(address as *mut u8, capacity) };
                }
                if table.pools.deallocate(address).is_none() {
                    diagnostics::emit_with_context(
                        &diagnostics::TA901,
                        &format!("pool rejected recorded block {:#x}", address),
                    );
                }
            }
            // SAFETY: the layout is the one the block was allocated with.
            AllocSource::Heap { layout } => unsafe { self.heap.dealloc(address, layout) },
            AllocSource::Numa { region } => drop(region),
            AllocSource::Cache { region } => {
                #[cfg(feature = "debug")]
                {
                    // SAFETY: the lines are still mapped and no longer handed out.
                    unsafe { crate::debug::poison::poison_freed(address as *mut u8, capacity) };
                }
                self.cache.lock().deallocate(region, address, capacity);
            }
        }

        self.prefetch.lock().forget_block(address, capacity);
        self.stats.record_free(size);
        size
    }

    /// Resize in place when the block has room, otherwise move it.
    pub(crate) fn reallocate(
        &self,
        address: usize,
        new_size: usize,
        alignment: usize,
        flags: AllocFlags,
    ) -> AllocResult<NonNull<u8>> {
        let alignment = check_alignment(alignment)?;
        let (old_id, old_size) = {
            let mut table = self.table.write();
            let record = table
                .records
                .get_mut(&address)
                .ok_or(AllocError::UnknownAddress { address })?;
            if new_size <= record.capacity && address % alignment == 0 {
                let old = record.size;
                record.size = new_size;
                self.links.lock().rekey(address, address, new_size);
                drop(table);
                self.stats.record_resize(old, new_size);
                return NonNull::new(address as *mut u8).ok_or(AllocError::UnknownAddress { address });
            }
            (record.id, record.size)
        };

        let (moved, moved_id) = self.allocate_tracked(new_size, alignment, flags, Route::from_flags(flags))?;
        self.finish_move(
            (address, old_id),
            (moved.as_ptr() as usize, moved_id),
            old_size.min(new_size),
            new_size,
        )?;
        trace!("moved {:#x} -> {:p} ({} bytes)", address, moved, new_size);
        Ok(moved)
    }

    /// Copy `copy_len` bytes into the new block, move the link and free the
    /// old block, all under one exclusive guard.
    ///
    /// Both blocks are identified by `(address, record id)`. The table lock
    /// is released while the new block is placed, so the old record may
    /// have been freed and its address handed to someone else meanwhile.
    /// In that case the new block is returned and nothing else is touched.
    fn finish_move(
        &self,
        (old, old_id): (usize, u64),
        (new, new_id): (usize, u64),
        copy_len: usize,
        new_size: usize,
    ) -> AllocResult<()> {
        let mut table = self.table.write();
        let is_live = |address: usize, id: u64| table.records.get(&address).map_or(false, |r| r.id == id);
        let (old_live, new_live) = (is_live(old, old_id), is_live(new, new_id));

        if !old_live || !new_live {
            if new_live {
                if let Some(record) = table.records.remove(&new) {
                    self.release_record(&mut table, record);
                }
            }
            drop(table);
            self.stats.publish_links(self.links.lock().health());
            return Err(if old_live {
                AllocError::OutOfMemory { size: new_size }
            } else {
                AllocError::UnknownAddress { address: old }
            });
        }

        // SAFETY: both records are live under the exclusive guard, distinct,
        // and each holds at least `copy_len` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(old as *const u8, new as *mut u8, copy_len);
        }
        self.links.lock().rekey(old, new, new_size);
        if let Some(record) = table.records.remove(&old) {
            self.release_record(&mut table, record);
        }
        Ok(())
    }

    // ---- links ----

    fn ensure_known(&self, address: usize) -> AllocResult<usize> {
        self.table
            .read()
            .records
            .get(&address)
            .map(|r| r.size)
            .ok_or(AllocError::UnknownAddress { address })
    }

    pub fn link(&self, a: usize, b: usize) -> AllocResult<()> {
        let table = self.table.read();
        let size_of = |address: usize| {
            table
                .records
                .get(&address)
                .map(|r| r.size)
                .ok_or(AllocError::UnknownAddress { address })
        };
        let (size_a, size_b) = (size_of(a)?, size_of(b)?);
        let mut links = self.links.lock();
        links.link((a, size_a), (b, size_b))?;
        self.stats.publish_links(links.health());
        Ok(())
    }

    pub fn unlink(&self, address: usize) -> AllocResult<usize> {
        self.ensure_known(address)?;
        let mut links = self.links.lock();
        let partner = links.unlink(address)?;
        self.stats.publish_links(links.health());
        Ok(partner)
    }

    pub fn access_link(&self, address: usize) -> AllocResult<LinkState> {
        self.ensure_known(address)?;
        let mut links = self.links.lock();
        let state = links.access(address)?;
        self.stats.publish_links(links.health());
        Ok(state)
    }

    pub fn restore_link(&self, address: usize) -> AllocResult<LinkState> {
        self.ensure_known(address)?;
        let mut links = self.links.lock();
        let state = links.restore(address)?;
        self.stats.publish_links(links.health());
        Ok(state)
    }

    pub fn link_state(&self, address: usize) -> LinkState {
        self.links.lock().state(address)
    }

    pub fn link_strength(&self, address: usize) -> f64 {
        self.links.lock().strength(address)
    }

    pub fn link_partner(&self, address: usize) -> Option<usize> {
        self.links.lock().partner(address)
    }

    /// Advance link lifetimes by `elapsed_ms` and run interference.
    pub fn tick_links(&self, elapsed_ms: f64) -> DecayReport {
        let mut links = self.links.lock();
        let report = links.tick(elapsed_ms);
        debug_assert!(links.is_symmetric());
        self.stats.publish_links(links.health());
        report
    }

    // ---- prefetch ----

    pub fn add_prefetch_hint(&self, address: usize, offset: isize, locality: Locality) {
        self.prefetch.lock().add_hint(address, offset, locality);
    }

    pub fn remove_prefetch_hint(&self, address: usize) -> bool {
        self.prefetch.lock().remove_hint(address)
    }

    /// Queue an access for the next prefetch tick. Lock-free.
    pub fn record_access(&self, address: usize) {
        self.accesses.push(address);
    }

    pub fn hotspots(&self) -> Vec<HotSpot> {
        self.prefetch.lock().hotspots()
    }

    pub fn prefetch_hints(&self) -> Vec<PrefetchHint> {
        self.prefetch.lock().hints()
    }

    /// Fold queued accesses into the cache profiles and the prefetch engine.
    pub fn prefetch_pass(&self) -> TickReport {
        let events = self.accesses.drain();
        let blocks: Vec<Option<(usize, usize)>> = {
            let table = self.table.read();
            events.iter().map(|&addr| table.containing(addr)).collect()
        };

        let stride_hints = {
            let mut cache = self.cache.lock();
            for &addr in &events {
                cache.record_access(addr);
            }
            cache.decay();
            if events.is_empty() {
                Vec::new()
            } else {
                cache.stride_hints()
            }
        };

        let mut prefetch = self.prefetch.lock();
        for (&addr, block) in events.iter().zip(blocks) {
            prefetch.observe(addr, block);
        }
        for (last, stride, locality) in stride_hints {
            prefetch.derive_hint(last, stride, locality);
        }
        let report = prefetch.end_tick();
        self.stats.set_cache_hit_rate(prefetch.hit_rate());
        report
    }

    // ---- maintenance ----

    /// Full compaction pass for the maintenance loop and explicit callers.
    /// In low-memory mode it also reclaims allocations older than the
    /// staleness threshold.
    pub fn compact(&self) -> f64 {
        let mut table = self.table.write();
        let fragmentation = self.compact_pools(&mut table);
        if self.stats.is_low_memory() {
            self.reclaim_stale(&mut table);
        }
        debug!("compaction: fragmentation {:.3}", fragmentation);
        fragmentation
    }

    /// Rebuild pool free lists and measure fragmentation. Frees nothing.
    fn compact_pools(&self, table: &mut AllocTable) -> f64 {
        let fragmentation = table.pools.compact();
        self.stats.record_compaction(fragmentation);

        if !table.pools.check_invariants() {
            diagnostics::emit_with_context(&diagnostics::TA901, "pool free list and bitmap disagree");
        }
        if fragmentation > self.config.fragmentation_threshold {
            diagnostics::emit_with_context(
                &diagnostics::TA301,
                &format!("{:.1}% > {:.1}%", fragmentation * 100.0, self.config.fragmentation_threshold * 100.0),
            );
        }
        fragmentation
    }

    /// Free every record older than `stale_allocation_age`. Holds the
    /// exclusive table lock for the whole sweep.
    fn reclaim_stale(&self, table: &mut AllocTable) -> usize {
        let age = self.config.stale_allocation_age;
        let stale: Vec<usize> = table
            .records
            .values()
            .filter(|r| r.created.elapsed() >= age)
            .map(|r| r.address)
            .collect();

        let mut bytes = 0;
        for address in &stale {
            if let Some(record) = table.records.remove(address) {
                bytes += self.release_record(table, record);
            }
        }
        if !stale.is_empty() {
            self.stats.publish_links(self.links.lock().health());
            diagnostics::emit_with_context(
                &diagnostics::TA302,
                &format!("{} allocation(s), {}", stale.len(), format_bytes(bytes)),
            );
        }
        stale.len()
    }

    /// Classify nodes and migrate hot NUMA allocations off overloaded ones.
    pub fn balance_numa(&self) -> BalanceReport {
        let mut table = self.table.write();
        let mut numa = self.numa.lock();
        let report = numa.balance();
        self.stats.set_numa_efficiency(report.efficiency);
        if report.overloaded.is_empty() {
            return report;
        }

        let hot = self.prefetch.lock().hot_blocks(MIGRATION_TEMPERATURE);
        let mut migrated = 0;
        for plan in plan_migrations(&table, &numa, &hot) {
            match numa.migrate(plan.address, plan.len, plan.from, plan.to) {
                Ok(()) => {
                    if let Some(record) = table.records.get_mut(&plan.address) {
                        record.numa_node = plan.to;
                    }
                    migrated += 1;
                }
                Err(err) => debug!("migration of {:#x} skipped: {}", plan.address, err),
            }
        }
        if migrated > 0 {
            info!("migrated {} hot allocation(s) off overloaded nodes", migrated);
        }
        report
    }

    /// Toggle low-memory mode. Enabling it hands half the resident free
    /// pool blocks back to the kernel.
    pub fn set_low_memory_mode(&self, enable: bool) {
        self.stats.set_low_memory(enable);
        if enable {
            let (blocks, bytes) = self.table.write().pools.release_free_blocks();
            info!("low-memory mode on: released {} free block(s), {}", blocks, format_bytes(bytes));
        } else {
            info!("low-memory mode off");
        }
    }

    // ---- introspection ----

    pub fn statistics(&self) -> AllocStats {
        let mut stats = self.stats.snapshot();
        stats.heap_usage = self.heap.allocated_bytes();
        stats.heap_allocations = self.heap.allocation_count();
        stats
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
        self.prefetch.lock().reset_counters();
        self.stats.set_cache_hit_rate(0.0);
    }

    pub fn allocation_size(&self, address: usize) -> Option<usize> {
        self.table.read().records.get(&address).map(|r| r.size)
    }

    pub fn numa_node_of(&self, address: usize) -> Option<usize> {
        self.table.read().records.get(&address).map(|r| r.numa_node)
    }

    pub fn allocation_info(&self, address: usize) -> Option<AllocationInfo> {
        let table = self.table.read();
        let record = table.records.get(&address)?;
        let partner = self.links.lock().partner(address);
        Some(record.info(partner))
    }

    pub fn allocations(&self) -> Vec<AllocationInfo> {
        let table = self.table.read();
        let links = self.links.lock();
        table
            .records
            .values()
            .map(|r| r.info(links.partner(r.address)))
            .collect()
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.table.read().pools.snapshots()
    }

    pub fn numa_nodes(&self) -> Vec<NumaNodeSnapshot> {
        self.numa.lock().snapshots()
    }

    pub fn cache_regions(&self) -> Vec<CacheRegionSnapshot> {
        self.cache.lock().snapshots()
    }

    /// Gather every table under its lock and write the dump to `path`.
    pub fn dump_memory_map(&self, path: &Path) -> AllocResult<()> {
        let map = {
            let table = self.table.read();
            let links = self.links.lock();
            MemoryMap {
                stats: self.statistics(),
                pools: table
                    .pools
                    .iter()
                    .map(|p| (p.snapshot(), p.occupancy_map()))
                    .collect(),
                nodes: self.numa.lock().snapshots(),
                caches: self.cache.lock().snapshots(),
                links: links.entries(),
                allocations: table
                    .records
                    .values()
                    .map(|r| r.info(links.partner(r.address)))
                    .collect(),
            }
        };
        map.write_file(path)?;
        info!("memory map written to {}", path.display());
        Ok(())
    }
}

impl Drop for AllocatorState {
    fn drop(&mut self) {
        let mut table = self.table.write();
        let records = std::mem::take(&mut table.records);
        if !records.is_empty() {
            debug!("releasing {} live allocation(s) at teardown", records.len());
        }
        for record in records.into_values() {
            if let AllocSource::Heap { layout } = record.source {
                // SAFETY: heap records own their block with this layout.
                unsafe { self.heap.dealloc(record.address, layout) };
            }
        }
    }
}

/// One hot allocation to move between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Migration {
    address: usize,
    len: usize,
    from: usize,
    to: usize,
}

/// NUMA-tier records among `hot` whose home node is overloaded, paired
/// with the least-loaded node that can take them.
fn plan_migrations(table: &AllocTable, numa: &NumaManager, hot: &[(usize, usize)]) -> Vec<Migration> {
    hot.iter()
        .filter_map(|&(address, _)| {
            let record = table.records.get(&address)?;
            if !matches!(record.source, AllocSource::Numa { .. }) || !numa.is_overloaded(record.numa_node) {
                return None;
            }
            let to = numa.migration_target(record.numa_node)?;
            Some(Migration {
                address,
                len: record.capacity,
                from: record.numa_node,
                to,
            })
        })
        .collect()
}

/// Zero `len` bytes so the write survives optimisation of a block about
/// to be freed.
///
/// # Safety
///
/// `[addr, addr + len)` must be valid for writes.
unsafe fn scrub(addr: usize, len: usize) {
    std::ptr::write_bytes(addr as *mut u8, 0, len);
    compiler_fence(Ordering::SeqCst);
}
