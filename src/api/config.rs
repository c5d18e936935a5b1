//! Allocator configuration.

use std::time::Duration;

use crate::api::error::{AllocError, AllocResult};
use crate::util::size::{gib, kib, mib};

/// Configuration for the tiered allocator.
#[derive(Debug, Clone)]
pub struct AllocConfig {
    /// Bytes reserved per pool size class (default: 1 GiB)
    pub pool_budget: usize,

    /// Block sizes of the pool ladder, ascending
    pub pool_size_classes: Vec<usize>,

    /// Bind allocations to NUMA nodes when the platform supports it
    pub enable_numa: bool,

    /// Accepted for compatibility; compressed pools are not supported
    pub enable_compression: bool,

    /// Scrub every block on free
    pub enable_encryption: bool,

    /// Advise the kernel to back pool regions with huge pages
    pub enable_huge_pages: bool,

    /// Page-lock pool regions (`mlock`)
    pub enable_memory_locking: bool,

    /// Issue hardware prefetch instructions for hints
    pub enable_prefetch: bool,

    /// Spawn the four maintenance threads at initialize
    pub enable_background_maintenance: bool,

    /// Fragmentation ratio above which compaction logs a warning
    pub fragmentation_threshold: f64,

    /// Per-access link decay rate
    pub link_decay_rate: f64,

    /// Lifetime of a fresh link, in milliseconds
    pub coherence_window_ms: u64,

    /// Strength of the interference pass between adjacent pairs
    pub interference_factor: f64,

    /// Accesses per prefetch tick that activate a hotspot
    pub hotspot_threshold: u32,

    /// Allocation attempts after the first failure
    pub max_allocation_retries: u32,

    /// Linear backoff step between retries
    pub retry_backoff: Duration,

    /// Upper bound for a single backoff sleep
    pub retry_backoff_cap: Duration,

    /// Age after which low-memory mode reclaims an allocation
    pub stale_allocation_age: Duration,

    /// Compaction loop period
    pub compaction_interval: Duration,

    /// Link decay loop period
    pub link_decay_interval: Duration,

    /// Prefetch loop period
    pub prefetch_interval: Duration,

    /// NUMA balance loop period
    pub balance_interval: Duration,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            pool_budget: gib(1),
            pool_size_classes: vec![kib(1), kib(4), kib(64), mib(1), mib(16), mib(256), gib(1)],
            enable_numa: true,
            enable_compression: false,
            enable_encryption: false,
            enable_huge_pages: false,
            enable_memory_locking: false,
            enable_prefetch: true,
            enable_background_maintenance: true,
            fragmentation_threshold: 0.5,
            link_decay_rate: 0.01,
            coherence_window_ms: 1000,
            interference_factor: 0.05,
            hotspot_threshold: 8,
            max_allocation_retries: 3,
            retry_backoff: Duration::from_millis(1),
            retry_backoff_cap: Duration::from_millis(8),
            stale_allocation_age: Duration::from_secs(300),
            compaction_interval: Duration::from_secs(5),
            link_decay_interval: Duration::from_millis(100),
            prefetch_interval: Duration::from_millis(50),
            balance_interval: Duration::from_secs(10),
        }
    }
}

impl AllocConfig {
    /// Small pools, no background threads. Suited to tests and tools.
    pub fn minimal() -> Self {
        Self {
            pool_budget: mib(4),
            pool_size_classes: vec![kib(1), kib(4), kib(64), mib(1)],
            enable_background_maintenance: false,
            ..Self::default()
        }
    }

    /// Large budget with locked, huge-page backed pools.
    pub fn high_performance() -> Self {
        Self {
            pool_budget: gib(2),
            enable_huge_pages: true,
            enable_memory_locking: true,
            max_allocation_retries: 5,
            ..Self::default()
        }
    }

    /// Builder pattern: set pool budget.
    pub fn with_pool_budget(mut self, budget: usize) -> Self {
        self.pool_budget = budget;
        self
    }

    /// Builder pattern: set the pool size-class ladder.
    pub fn with_size_classes(mut self, classes: Vec<usize>) -> Self {
        self.pool_size_classes = classes;
        self
    }

    /// Builder pattern: enable NUMA binding.
    pub fn with_numa(mut self, enable: bool) -> Self {
        self.enable_numa = enable;
        self
    }

    /// Builder pattern: enable scrub-on-free.
    pub fn with_encryption(mut self, enable: bool) -> Self {
        self.enable_encryption = enable;
        self
    }

    /// Builder pattern: enable huge pages.
    pub fn with_huge_pages(mut self, enable: bool) -> Self {
        self.enable_huge_pages = enable;
        self
    }

    /// Builder pattern: enable page locking.
    pub fn with_memory_locking(mut self, enable: bool) -> Self {
        self.enable_memory_locking = enable;
        self
    }

    /// Builder pattern: enable hardware prefetch.
    pub fn with_prefetch(mut self, enable: bool) -> Self {
        self.enable_prefetch = enable;
        self
    }

    /// Builder pattern: spawn maintenance threads.
    pub fn with_background_maintenance(mut self, enable: bool) -> Self {
        self.enable_background_maintenance = enable;
        self
    }

    /// Builder pattern: set link decay rate.
    pub fn with_link_decay_rate(mut self, rate: f64) -> Self {
        self.link_decay_rate = rate;
        self
    }

    /// Builder pattern: set coherence window.
    pub fn with_coherence_window_ms(mut self, ms: u64) -> Self {
        self.coherence_window_ms = ms;
        self
    }

    /// Builder pattern: set hotspot threshold.
    pub fn with_hotspot_threshold(mut self, accesses: u32) -> Self {
        self.hotspot_threshold = accesses;
        self
    }

    /// Builder pattern: set retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_allocation_retries = retries;
        self
    }

    /// Builder pattern: set the low-memory staleness threshold.
    pub fn with_stale_allocation_age(mut self, age: Duration) -> Self {
        self.stale_allocation_age = age;
        self
    }

    /// Builder pattern: set all four maintenance periods.
    pub fn with_intervals(
        mut self,
        compaction: Duration,
        link_decay: Duration,
        prefetch: Duration,
        balance: Duration,
    ) -> Self {
        self.compaction_interval = compaction;
        self.link_decay_interval = link_decay;
        self.prefetch_interval = prefetch;
        self.balance_interval = balance;
        self
    }

    /// Check the configuration for values the allocator cannot work with.
    pub fn validate(&self) -> AllocResult<()> {
        if self.pool_budget == 0 {
            return Err(AllocError::InvalidConfig("pool budget must be non-zero"));
        }
        if self.pool_size_classes.is_empty() {
            return Err(AllocError::InvalidConfig("at least one size class is required"));
        }
        if self.pool_size_classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AllocError::InvalidConfig("size classes must be strictly ascending"));
        }
        if self.pool_size_classes.iter().any(|&c| c == 0) {
            return Err(AllocError::InvalidConfig("size classes must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.link_decay_rate) {
            return Err(AllocError::InvalidConfig("link decay rate must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.interference_factor) {
            return Err(AllocError::InvalidConfig("interference factor must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.fragmentation_threshold) {
            return Err(AllocError::InvalidConfig(
                "fragmentation threshold must be within [0, 1]",
            ));
        }
        if self.coherence_window_ms == 0 {
            return Err(AllocError::InvalidConfig("coherence window must be non-zero"));
        }
        let periods = [
            self.compaction_interval,
            self.link_decay_interval,
            self.prefetch_interval,
            self.balance_interval,
        ];
        if periods.iter().any(Duration::is_zero) {
            return Err(AllocError::InvalidConfig("maintenance intervals must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder_matches_classes() {
        let config = AllocConfig::default();
        assert_eq!(config.pool_size_classes.len(), 7);
        assert_eq!(config.pool_size_classes[1], 4096);
        assert_eq!(config.coherence_window_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unsorted_classes() {
        let config = AllocConfig::minimal().with_size_classes(vec![4096, 1024]);
        assert!(matches!(config.validate(), Err(AllocError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let config = AllocConfig::minimal().with_link_decay_rate(1.5);
        assert!(config.validate().is_err());
    }
}
