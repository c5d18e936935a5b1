//! Size-class pool allocator.
//!
//! Each size class owns one contiguous region carved into equal blocks.
//! A free list gives O(1) allocate and free; a bitmap records which blocks
//! are live so double frees are caught and compaction can rebuild the
//! free list without touching live data.

use log::{debug, warn};

use crate::allocators::region::Region;
use crate::api::config::AllocConfig;
use crate::api::error::AllocResult;
use crate::api::stats::PoolSnapshot;
use crate::diagnostics;
use crate::util::bitmap::Bitmap;
use crate::util::layout::natural_alignment;
use crate::util::size::{format_bytes, mib};

/// Largest alignment requested for a pool region mapping.
const MAX_REGION_ALIGN: usize = mib(2);

/// How the ladder picks a class for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStrategy {
    /// Smallest fitting class, then larger classes while they are exhausted.
    #[default]
    NextAvailable,
    /// Only the smallest fitting class.
    SmallestFit,
}

/// Options applied to every pool region at creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    pub lock_pages: bool,
    pub huge_pages: bool,
    pub numa_node: Option<usize>,
}

/// A single size class.
pub struct Pool {
    /// Bytes per block
    block_size: usize,

    /// Number of blocks carved from the region
    total_blocks: usize,

    /// Backing memory
    region: Region,

    /// Free block addresses; the last entry is handed out next
    free_list: Vec<usize>,

    /// Bit i set while block i is allocated
    allocated: Bitmap,

    /// Bit i set while block i's pages are returned to the kernel
    released: Bitmap,

    /// Alignment every block in this pool satisfies
    block_align: usize,

    /// Home node of the region
    numa_node: usize,
}

impl Pool {
    /// Map a region for `total_blocks` blocks of `block_size` bytes.
    pub fn new(block_size: usize, total_blocks: usize, options: PoolOptions) -> AllocResult<Self> {
        let region_align = natural_alignment(block_size).min(MAX_REGION_ALIGN);
        let mut region = Region::map(block_size * total_blocks, region_align)?;

        if options.lock_pages && !region.lock() {
            let context = format!("{} pool, {}", format_bytes(block_size), format_bytes(region.len()));
            diagnostics::emit_with_context(&diagnostics::TA103, &context);
        }
        if options.huge_pages && !region.advise_huge_pages() {
            debug!("huge pages not available for {} pool", format_bytes(block_size));
        }
        let numa_node = match options.numa_node {
            Some(node) if region.bind_to_node(node, false) => node,
            _ => 0,
        };

        let block_align = natural_alignment(region.base()).min(natural_alignment(block_size));
        let mut pool = Self {
            block_size,
            total_blocks,
            free_list: Vec::with_capacity(total_blocks),
            allocated: Bitmap::new(total_blocks),
            released: Bitmap::new(total_blocks),
            block_align,
            numa_node,
            region,
        };
        pool.rebuild_free_list();
        Ok(pool)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_align(&self) -> usize {
        self.block_align
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn allocated_blocks(&self) -> usize {
        self.allocated.count_ones()
    }

    pub fn free_blocks(&self) -> usize {
        self.free_list.len()
    }

    pub fn released_blocks(&self) -> usize {
        self.released.count_ones()
    }

    pub fn numa_node(&self) -> usize {
        self.numa_node
    }

    pub fn free_bytes(&self) -> usize {
        self.free_blocks() * self.block_size
    }

    pub fn utilization(&self) -> f64 {
        self.allocated_blocks() as f64 / self.total_blocks as f64
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    fn block_addr(&self, index: usize) -> usize {
        self.region.base() + index * self.block_size
    }

    fn block_index(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.region.base();
        if offset % self.block_size != 0 {
            return None;
        }
        Some(offset / self.block_size)
    }

    /// Pop a free block. O(1).
    pub fn allocate(&mut self) -> Option<usize> {
        let addr = self.free_list.pop()?;
        let index = (addr - self.region.base()) / self.block_size;
        let fresh = self.allocated.set(index);
        debug_assert!(fresh, "free list handed out a live block");
        self.released.clear(index);
        Some(addr)
    }

    /// Return a block. O(1). Returns false for foreign, misaligned or
    /// already-free addresses.
    pub fn deallocate(&mut self, addr: usize) -> bool {
        let Some(index) = self.block_index(addr) else {
            return false;
        };
        if !self.allocated.clear(index) {
            return false;
        }
        self.free_list.push(addr);
        true
    }

    /// Rebuild the free list in bitmap order.
    ///
    /// The lowest resident block is popped first; released blocks go to
    /// the bottom so their pages are only faulted back in when needed.
    pub fn rebuild_free_list(&mut self) {
        self.free_list.clear();
        for index in (0..self.total_blocks).rev() {
            if !self.allocated.get(index) && self.released.get(index) {
                self.free_list.push(self.block_addr(index));
            }
        }
        for index in (0..self.total_blocks).rev() {
            if !self.allocated.get(index) && !self.released.get(index) {
                self.free_list.push(self.block_addr(index));
            }
        }
    }

    /// Hand the pages of half the resident free blocks back to the kernel.
    ///
    /// The highest-addressed candidates are chosen. Released blocks stay
    /// allocatable. Returns `(blocks, bytes)` released.
    pub fn release_free_half(&mut self) -> (usize, usize) {
        let candidates: Vec<usize> = (0..self.total_blocks)
            .rev()
            .filter(|&i| !self.allocated.get(i) && !self.released.get(i))
            .collect();
        let take = candidates.len() / 2;

        let mut bytes = 0;
        let mut chosen: Vec<usize> = candidates.into_iter().take(take).collect();
        chosen.sort_unstable();

        // Release contiguous runs so sub-page blocks still free whole pages.
        let mut i = 0;
        while i < chosen.len() {
            let start = chosen[i];
            let mut end = start + 1;
            while i + 1 < chosen.len() && chosen[i + 1] == end {
                i += 1;
                end += 1;
            }
            bytes += self
                .region
                .release_range(start * self.block_size, (end - start) * self.block_size);
            i += 1;
        }
        for &index in &chosen {
            self.released.set(index);
        }
        self.rebuild_free_list();
        (take, bytes)
    }

    /// Bookkeeping consistency check.
    pub fn check_invariants(&self) -> bool {
        self.free_blocks() + self.allocated_blocks() == self.total_blocks
            && self.free_list.iter().all(|&addr| {
                self.block_index(addr)
                    .map_or(false, |index| !self.allocated.get(index))
            })
    }

    /// Occupancy rendered as run-length text.
    pub fn occupancy_map(&self) -> String {
        self.allocated.render_runs()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            block_size: self.block_size,
            base_address: self.region.base(),
            total_blocks: self.total_blocks,
            free_blocks: self.free_blocks(),
            allocated_blocks: self.allocated_blocks(),
            released_blocks: self.released_blocks(),
            utilization: self.utilization(),
            is_locked: self.region.is_locked(),
            numa_node: self.numa_node,
        }
    }
}

/// The full ladder of pools, ascending by block size.
pub struct PoolLadder {
    pools: Vec<Pool>,
}

impl PoolLadder {
    /// Create one pool per configured size class.
    ///
    /// Classes larger than the budget, or whose region cannot be mapped,
    /// are skipped with a warning.
    pub fn new(config: &AllocConfig, numa_node: Option<usize>) -> Self {
        let options = PoolOptions {
            lock_pages: config.enable_memory_locking,
            huge_pages: config.enable_huge_pages,
            numa_node,
        };

        let mut pools = Vec::with_capacity(config.pool_size_classes.len());
        for &class in &config.pool_size_classes {
            let blocks = config.pool_budget / class;
            if blocks == 0 {
                warn!(
                    "size class {} exceeds pool budget {}; skipped",
                    format_bytes(class),
                    format_bytes(config.pool_budget)
                );
                continue;
            }
            match Pool::new(class, blocks, options) {
                Ok(pool) => {
                    debug!("pool {} x {} ready", format_bytes(class), blocks);
                    pools.push(pool);
                }
                Err(err) => warn!("size class {} unavailable: {}", format_bytes(class), err),
            }
        }
        Self { pools }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool(&self, class: usize) -> &Pool {
        &self.pools[class]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter()
    }

    /// Allocate a block for `size` bytes at `alignment`.
    ///
    /// Returns the class index and block address, or `None` when no
    /// eligible class has a free block.
    pub fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
        strategy: PoolStrategy,
    ) -> Option<(usize, usize)> {
        let first = self.pools.iter().position(|p| p.block_size >= size)?;
        let candidates = match strategy {
            PoolStrategy::SmallestFit => first..first + 1,
            PoolStrategy::NextAvailable => first..self.pools.len(),
        };

        for class in candidates {
            let pool = &mut self.pools[class];
            if pool.block_align < alignment {
                continue;
            }
            if let Some(addr) = pool.allocate() {
                return Some((class, addr));
            }
        }
        None
    }

    /// Free a block by address containment. Returns the class it came from.
    pub fn deallocate(&mut self, addr: usize) -> Option<usize> {
        let class = self.class_of(addr)?;
        self.pools[class].deallocate(addr).then_some(class)
    }

    /// Class whose region contains `addr`.
    pub fn class_of(&self, addr: usize) -> Option<usize> {
        self.pools.iter().position(|p| p.contains(addr))
    }

    /// Rebuild every free list and return the fragmentation ratio.
    pub fn compact(&mut self) -> f64 {
        for pool in &mut self.pools {
            pool.rebuild_free_list();
        }
        self.fragmentation()
    }

    /// `1 - largest_class_free_bytes / total_free_bytes`, 0 when nothing is free.
    pub fn fragmentation(&self) -> f64 {
        let total: usize = self.pools.iter().map(Pool::free_bytes).sum();
        if total == 0 {
            return 0.0;
        }
        let largest = self.pools.iter().map(Pool::free_bytes).max().unwrap_or(0);
        (1.0 - largest as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Release half the resident free blocks of every pool.
    pub fn release_free_blocks(&mut self) -> (usize, usize) {
        self.pools
            .iter_mut()
            .map(Pool::release_free_half)
            .fold((0, 0), |(b, n), (pb, pn)| (b + pb, n + pn))
    }

    pub fn check_invariants(&self) -> bool {
        self.pools.iter().all(Pool::check_invariants)
    }

    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(Pool::snapshot).collect()
    }
}
