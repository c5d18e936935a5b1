//! Lock-free statistics collection.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::stats::{AllocStats, LinkHealth};
use crate::sync::atomics::{AtomicCounter, AtomicF64, AtomicGauge};

/// Counters updated on every allocation path and by the maintenance loops.
///
/// Writers never wait on readers; a snapshot is a series of relaxed loads.
pub struct StatsCollector {
    current_usage: AtomicGauge,
    peak_usage: AtomicGauge,
    total_allocated: AtomicCounter,
    total_freed: AtomicCounter,
    allocation_count: AtomicCounter,
    deallocation_count: AtomicCounter,
    fallback_count: AtomicCounter,
    failed_allocations: AtomicCounter,
    compaction_runs: AtomicCounter,
    fragmentation: AtomicF64,
    numa_efficiency: AtomicF64,
    cache_hit_rate: AtomicF64,
    low_memory: AtomicBool,
    links_total: AtomicGauge,
    links_linked: AtomicGauge,
    links_accessed: AtomicGauge,
    links_expired: AtomicGauge,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            current_usage: AtomicGauge::new(0),
            peak_usage: AtomicGauge::new(0),
            total_allocated: AtomicCounter::new(0),
            total_freed: AtomicCounter::new(0),
            allocation_count: AtomicCounter::new(0),
            deallocation_count: AtomicCounter::new(0),
            fallback_count: AtomicCounter::new(0),
            failed_allocations: AtomicCounter::new(0),
            compaction_runs: AtomicCounter::new(0),
            fragmentation: AtomicF64::new(0.0),
            numa_efficiency: AtomicF64::new(1.0),
            cache_hit_rate: AtomicF64::new(0.0),
            low_memory: AtomicBool::new(false),
            links_total: AtomicGauge::new(0),
            links_linked: AtomicGauge::new(0),
            links_accessed: AtomicGauge::new(0),
            links_expired: AtomicGauge::new(0),
        }
    }

    /// Record an allocation of `size` bytes.
    pub fn record_alloc(&self, size: usize) {
        self.allocation_count.increment();
        self.total_allocated.add(size as u64);
        let current = self.current_usage.add(size);
        self.peak_usage.update_max(current);
    }

    /// Record a deallocation of `size` bytes.
    pub fn record_free(&self, size: usize) {
        self.deallocation_count.increment();
        self.total_freed.add(size as u64);
        self.current_usage.sub(size);
    }

    /// An in-place resize from `old` to `new` bytes.
    pub fn record_resize(&self, old: usize, new: usize) {
        if new >= old {
            self.total_allocated.add((new - old) as u64);
            let current = self.current_usage.add(new - old);
            self.peak_usage.update_max(current);
        } else {
            self.total_freed.add((old - new) as u64);
            self.current_usage.sub(old - new);
        }
    }

    pub fn record_fallback(&self) {
        self.fallback_count.increment();
    }

    pub fn record_failure(&self) {
        self.failed_allocations.increment();
    }

    pub fn record_compaction(&self, fragmentation: f64) {
        self.compaction_runs.increment();
        self.fragmentation.set(fragmentation.clamp(0.0, 1.0));
    }

    pub fn set_numa_efficiency(&self, efficiency: f64) {
        self.numa_efficiency.set(efficiency.clamp(0.0, 1.0));
    }

    pub fn set_cache_hit_rate(&self, rate: f64) {
        self.cache_hit_rate.set(rate.clamp(0.0, 1.0));
    }

    pub fn set_low_memory(&self, enabled: bool) {
        self.low_memory.store(enabled, Ordering::Relaxed);
    }

    pub fn is_low_memory(&self) -> bool {
        self.low_memory.load(Ordering::Relaxed)
    }

    /// Publish the link table's population.
    pub fn publish_links(&self, health: LinkHealth) {
        self.links_total.set(health.total);
        self.links_linked.set(health.linked);
        self.links_accessed.set(health.accessed);
        self.links_expired.set(health.expired);
    }

    pub fn current_usage(&self) -> usize {
        self.current_usage.get()
    }

    pub fn snapshot(&self) -> AllocStats {
        AllocStats {
            current_usage: self.current_usage.get(),
            peak_usage: self.peak_usage.get(),
            total_allocated: self.total_allocated.get(),
            total_freed: self.total_freed.get(),
            allocation_count: self.allocation_count.get(),
            deallocation_count: self.deallocation_count.get(),
            fallback_count: self.fallback_count.get(),
            failed_allocations: self.failed_allocations.get(),
            // Owned by the heap tier; filled in by the allocator state.
            heap_usage: 0,
            heap_allocations: 0,
            compaction_runs: self.compaction_runs.get(),
            fragmentation_ratio: self.fragmentation.get(),
            numa_efficiency: self.numa_efficiency.get(),
            cache_hit_rate: self.cache_hit_rate.get(),
            low_memory_mode: self.is_low_memory(),
            links: LinkHealth {
                total: self.links_total.get(),
                linked: self.links_linked.get(),
                accessed: self.links_accessed.get(),
                expired: self.links_expired.get(),
            },
        }
    }

    /// Zero cumulative counters and drop the peak to the current usage.
    /// Gauges and ratios describe the present and are kept.
    pub fn reset(&self) {
        self.total_allocated.reset();
        self.total_freed.reset();
        self.allocation_count.reset();
        self.deallocation_count.reset();
        self.fallback_count.reset();
        self.failed_allocations.reset();
        self.compaction_runs.reset();
        self.peak_usage.set(self.current_usage.get());
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_high_water() {
        let stats = StatsCollector::new();
        stats.record_alloc(100);
        stats.record_alloc(50);
        stats.record_free(100);
        let snap = stats.snapshot();
        assert_eq!(snap.current_usage, 50);
        assert_eq!(snap.peak_usage, 150);
        assert_eq!(snap.total_allocated, 150);
        assert_eq!(snap.total_freed, 100);
        assert_eq!(snap.active_allocations(), 1);
    }

    #[test]
    fn test_resize_adjusts_usage() {
        let stats = StatsCollector::new();
        stats.record_alloc(100);
        stats.record_resize(100, 40);
        assert_eq!(stats.current_usage(), 40);
        stats.record_resize(40, 300);
        assert_eq!(stats.snapshot().peak_usage, 300);
    }

    #[test]
    fn test_reset_keeps_present_state() {
        let stats = StatsCollector::new();
        stats.record_alloc(64);
        stats.record_alloc(64);
        stats.record_free(64);
        stats.record_compaction(2.0);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.allocation_count, 0);
        assert_eq!(snap.compaction_runs, 0);
        assert_eq!(snap.current_usage, 64);
        assert_eq!(snap.peak_usage, 64);
        assert_eq!(snap.fragmentation_ratio, 1.0);
    }
}
