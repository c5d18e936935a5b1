//! Allocation statistics and read-only tier snapshots.

use std::time::Duration;

use crate::allocators::cache::CacheLevel;
use crate::api::flags::AllocFlags;
use crate::prefetch::pattern::AccessPattern;
use crate::util::size::format_bytes;

/// Aggregated allocation statistics.
#[derive(Debug, Clone, Default)]
pub struct AllocStats {
    /// Bytes currently allocated.
    pub current_usage: usize,

    /// Peak bytes allocated (high water mark).
    pub peak_usage: usize,

    /// Cumulative bytes handed out.
    pub total_allocated: u64,

    /// Cumulative bytes returned.
    pub total_freed: u64,

    /// Total number of allocations performed.
    pub allocation_count: u64,

    /// Total number of deallocations performed.
    pub deallocation_count: u64,

    /// Requests served by the system heap because no pool could.
    pub fallback_count: u64,

    /// Requests that failed after every retry.
    pub failed_allocations: u64,

    /// Bytes currently held by the system heap tier.
    pub heap_usage: usize,

    /// Blocks the system heap tier has served since start-up.
    pub heap_allocations: u64,

    /// Compaction passes completed.
    pub compaction_runs: u64,

    /// Fragmentation measured by the last compaction, in `[0, 1]`.
    pub fragmentation_ratio: f64,

    /// NUMA balance quality from the last balance pass, in `[0, 1]`.
    pub numa_efficiency: f64,

    /// Fraction of recorded accesses that hit a hint or hotspot.
    pub cache_hit_rate: f64,

    /// Low-memory mode is active.
    pub low_memory_mode: bool,

    /// Linked-block population.
    pub links: LinkHealth,
}

impl AllocStats {
    /// Allocations not yet freed.
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

impl std::fmt::Display for AllocStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Allocation Statistics:")?;
        writeln!(f, "  Current usage:   {}", format_bytes(self.current_usage))?;
        writeln!(f, "  Peak usage:      {}", format_bytes(self.peak_usage))?;
        writeln!(f, "  Total allocated: {} bytes", self.total_allocated)?;
        writeln!(f, "  Total freed:     {} bytes", self.total_freed)?;
        writeln!(f, "  Allocations:     {}", self.allocation_count)?;
        writeln!(f, "  Deallocations:   {}", self.deallocation_count)?;
        writeln!(f, "  Active:          {}", self.active_allocations())?;
        writeln!(f, "  Heap fallbacks:  {}", self.fallback_count)?;
        writeln!(f, "  Failed:          {}", self.failed_allocations)?;
        writeln!(
            f,
            "  Heap tier:       {} in use, {} served",
            format_bytes(self.heap_usage),
            self.heap_allocations
        )?;
        writeln!(f, "  Compactions:     {}", self.compaction_runs)?;
        writeln!(f, "  Fragmentation:   {:.1}%", self.fragmentation_ratio * 100.0)?;
        writeln!(f, "  NUMA efficiency: {:.1}%", self.numa_efficiency * 100.0)?;
        writeln!(f, "  Cache hit rate:  {:.1}%", self.cache_hit_rate * 100.0)?;
        writeln!(f, "  Low memory mode: {}", self.low_memory_mode)?;
        writeln!(
            f,
            "  Links:           {} total, {} linked, {} accessed, {} expired",
            self.links.total, self.links.linked, self.links.accessed, self.links.expired
        )?;
        Ok(())
    }
}

/// Linked-block population by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    /// Blocks tracked by the link table.
    pub total: usize,
    pub linked: usize,
    pub accessed: usize,
    pub expired: usize,
}

impl LinkHealth {
    /// Fraction of tracked blocks in a live (`Linked` or `Accessed`) pair.
    pub fn healthy_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.linked + self.accessed) as f64 / self.total as f64
    }

    /// Fraction of tracked blocks whose pair has expired.
    pub fn expired_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.expired as f64 / self.total as f64
    }
}

/// State of one size-class pool.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub block_size: usize,
    pub base_address: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    /// Free blocks whose pages were handed back to the kernel.
    pub released_blocks: usize,
    pub utilization: f64,
    pub is_locked: bool,
    pub numa_node: usize,
}

/// Accounting for one NUMA node.
#[derive(Debug, Clone, PartialEq)]
pub struct NumaNodeSnapshot {
    pub id: usize,
    pub total_memory: usize,
    pub free_memory: usize,
    pub allocated_memory: usize,
    pub utilization: f64,
    pub is_overloaded: bool,
    pub is_underutilized: bool,
}

/// Occupancy and access profile of one cache-sized region.
#[derive(Debug, Clone)]
pub struct CacheRegionSnapshot {
    pub level: CacheLevel,
    pub base_address: usize,
    pub size: usize,
    pub line_size: usize,
    pub used_lines: usize,
    pub total_lines: usize,
    pub access_pattern: AccessPattern,
    pub is_hot: bool,
    pub access_frequency: f64,
}

/// Tier that owns an allocation's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocTier {
    Pool,
    Heap,
    Numa,
    Cache,
}

impl std::fmt::Display for AllocTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AllocTier::Pool => "pool",
            AllocTier::Heap => "heap",
            AllocTier::Numa => "numa",
            AllocTier::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// Read-only view of one live allocation.
#[derive(Debug, Clone)]
pub struct AllocationInfo {
    pub address: usize,
    /// Requested size.
    pub size: usize,
    /// Usable bytes behind the address.
    pub capacity: usize,
    pub alignment: usize,
    pub flags: AllocFlags,
    pub numa_node: usize,
    pub tier: AllocTier,
    /// Time since the allocation was made.
    pub age: Duration,
    pub linked_partner: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_health_fractions() {
        let health = LinkHealth {
            total: 10,
            linked: 4,
            accessed: 2,
            expired: 4,
        };
        assert!((health.healthy_fraction() - 0.6).abs() < 1e-9);
        assert!((health.expired_fraction() - 0.4).abs() < 1e-9);
        assert_eq!(LinkHealth::default().healthy_fraction(), 0.0);
    }

    #[test]
    fn test_display_mentions_counts() {
        let stats = AllocStats {
            allocation_count: 5,
            deallocation_count: 2,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Allocations:     5"));
        assert!(text.contains("Active:          3"));
    }
}
