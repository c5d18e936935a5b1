//! Plain-text memory map dump.
//!
//! Pool occupancy is written run-length encoded (`#` allocated, `.` free)
//! so multi-gigabyte pools still produce a readable file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::api::error::AllocResult;
use crate::api::stats::{AllocStats, AllocationInfo, CacheRegionSnapshot, NumaNodeSnapshot, PoolSnapshot};
use crate::link::LinkedBlock;
use crate::util::size::format_bytes;

/// Everything a dump contains, gathered under the allocator's locks.
pub(crate) struct MemoryMap {
    pub stats: AllocStats,
    /// Snapshot plus run-length occupancy per pool.
    pub pools: Vec<(PoolSnapshot, String)>,
    pub nodes: Vec<NumaNodeSnapshot>,
    pub caches: Vec<CacheRegionSnapshot>,
    pub links: Vec<LinkedBlock>,
    pub allocations: Vec<AllocationInfo>,
}

impl MemoryMap {
    pub fn write_file(&self, path: &Path) -> AllocResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "== tieralloc memory map ==")?;
        writeln!(out)?;
        write!(out, "{}", self.stats)?;

        writeln!(out)?;
        writeln!(out, "== pools ({}) ==", self.pools.len())?;
        for (pool, occupancy) in &self.pools {
            writeln!(
                out,
                "[{} x {}] base {:#x} node {} free {} allocated {} released {} util {:.1}%{}",
                format_bytes(pool.block_size),
                pool.total_blocks,
                pool.base_address,
                pool.numa_node,
                pool.free_blocks,
                pool.allocated_blocks,
                pool.released_blocks,
                pool.utilization * 100.0,
                if pool.is_locked { " locked" } else { "" }
            )?;
            writeln!(out, "  {}", occupancy)?;
        }

        writeln!(out)?;
        writeln!(out, "== numa nodes ({}) ==", self.nodes.len())?;
        for node in &self.nodes {
            let mut flags = String::new();
            if node.is_overloaded {
                flags.push_str(" overloaded");
            }
            if node.is_underutilized {
                flags.push_str(" underutilized");
            }
            writeln!(
                out,
                "node {}: {} of {} allocated ({:.2}%){}",
                node.id,
                format_bytes(node.allocated_memory),
                format_bytes(node.total_memory),
                node.utilization * 100.0,
                flags
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== cache regions ({}) ==", self.caches.len())?;
        for cache in &self.caches {
            writeln!(
                out,
                "{} base {:#x} size {} lines {}/{} pattern {} freq {:.2}{}",
                cache.level,
                cache.base_address,
                format_bytes(cache.size),
                cache.used_lines,
                cache.total_lines,
                cache.access_pattern,
                cache.access_frequency,
                if cache.is_hot { " hot" } else { "" }
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== links ({}) ==", self.links.len())?;
        for block in &self.links {
            writeln!(
                out,
                "{:#x} {} strength {:.4} ttl {:.1}ms accesses {} weight {:.3}",
                block.address,
                block.state,
                block.link_strength,
                block.ttl_remaining,
                block.access_count,
                block.weight
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== allocations ({}) ==", self.allocations.len())?;
        for alloc in &self.allocations {
            write!(
                out,
                "{:#x} {} bytes (cap {}) align {} {} node {} age {:.1}s {:?}",
                alloc.address,
                alloc.size,
                alloc.capacity,
                alloc.alignment,
                alloc.tier,
                alloc.numa_node,
                alloc.age.as_secs_f64(),
                alloc.flags
            )?;
            match alloc.linked_partner {
                Some(partner) => writeln!(out, " -> {:#x}", partner)?,
                None => writeln!(out)?,
            }
        }
        Ok(())
    }
}
