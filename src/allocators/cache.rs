//! Cache-sized regions for line-aligned placement.
//!
//! One region per cache level, each the size of that level and carved
//! into cache lines. Allocation is first-fit over a line bitmap, so every
//! address returned here starts on a line boundary. Each region also keeps
//! an access profile that feeds prefetch decisions; placement never
//! depends on it.

use log::debug;

use crate::allocators::region::{page_size, Region};
use crate::api::stats::CacheRegionSnapshot;
use crate::prefetch::pattern::{AccessPattern, PatternTracker};
use crate::prefetch::Locality;
use crate::util::bitmap::Bitmap;
use crate::util::size::{format_bytes, kib, mib};

/// Default line size when detection fails.
pub const DEFAULT_LINE_SIZE: usize = 64;

/// Per-tick decay of a region's access frequency.
const FREQUENCY_DECAY: f64 = 0.99;

/// Regions whose decayed frequency reaches this are hot.
const HOT_FREQUENCY: f64 = 16.0;

/// Cache level a region is sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheLevel {
    L1,
    L2,
    L3,
}

impl CacheLevel {
    pub const ALL: [CacheLevel; 3] = [CacheLevel::L1, CacheLevel::L2, CacheLevel::L3];

    /// Prefetch locality matching data that lives in this level.
    pub fn locality(self) -> Locality {
        match self {
            CacheLevel::L1 => Locality::HIGH,
            CacheLevel::L2 => Locality::MODERATE,
            CacheLevel::L3 => Locality::LOW,
        }
    }
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheLevel::L1 => f.write_str("L1"),
            CacheLevel::L2 => f.write_str("L2"),
            CacheLevel::L3 => f.write_str("L3"),
        }
    }
}

/// Data-cache sizes and line size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    pub line_size: usize,
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            line_size: DEFAULT_LINE_SIZE,
            l1: kib(32),
            l2: kib(256),
            l3: mib(8),
        }
    }
}

impl CacheGeometry {
    /// Read cpu0's cache hierarchy from sysfs, filling gaps with defaults.
    pub fn detect() -> Self {
        let mut geometry = Self::default();
        #[cfg(target_os = "linux")]
        {
            use std::fs;

            for index in 0..8 {
                let dir = format!("/sys/devices/system/cpu/cpu0/cache/index{}", index);
                let read = |name: &str| fs::read_to_string(format!("{}/{}", dir, name)).ok();
                let Some(level) = read("level").and_then(|l| l.trim().parse::<u32>().ok()) else {
                    break;
                };
                if read("type").map_or(false, |t| t.trim() == "Instruction") {
                    continue;
                }
                let Some(size) = read("size").and_then(|s| parse_cache_size(&s)) else {
                    continue;
                };
                match level {
                    1 => geometry.l1 = size,
                    2 => geometry.l2 = size,
                    3 => geometry.l3 = size,
                    _ => {}
                }
                if let Some(line) = read("coherency_line_size").and_then(|l| l.trim().parse::<usize>().ok()) {
                    if line.is_power_of_two() {
                        geometry.line_size = line;
                    }
                }
            }
        }
        geometry
    }

    fn size_of(&self, level: CacheLevel) -> usize {
        match level {
            CacheLevel::L1 => self.l1,
            CacheLevel::L2 => self.l2,
            CacheLevel::L3 => self.l3,
        }
    }
}

/// Parse sysfs cache sizes such as `48K` or `32M`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cache_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let (digits, shift) = match text.chars().last()? {
        'K' => (&text[..text.len() - 1], 10),
        'M' => (&text[..text.len() - 1], 20),
        'G' => (&text[..text.len() - 1], 30),
        _ => (text, 0),
    };
    digits.parse::<usize>().ok().map(|n| n << shift)
}

/// Lines needed for `size` bytes, `None` if the size cannot be rounded.
fn lines_for(size: usize, line_size: usize) -> Option<usize> {
    size.max(1).checked_add(line_size - 1).map(|n| n / line_size)
}

struct CacheRegion {
    level: CacheLevel,
    region: Region,
    /// Bit i set while line i is in use.
    lines: Bitmap,
    tracker: PatternTracker,
    is_hot: bool,
    access_frequency: f64,
}

/// The per-level regions.
pub struct CacheRegionAllocator {
    regions: Vec<CacheRegion>,
    line_size: usize,
}

impl CacheRegionAllocator {
    /// Map one region per cache level. Levels whose region cannot be
    /// mapped are left out; requests then fall back to the heap.
    pub fn new(geometry: CacheGeometry) -> Self {
        let line_size = geometry.line_size;
        let mut regions = Vec::with_capacity(3);
        for level in CacheLevel::ALL {
            let size = geometry.size_of(level);
            match Region::map(size, page_size()) {
                Ok(region) => {
                    let lines = Bitmap::new(region.len() / line_size);
                    regions.push(CacheRegion {
                        level,
                        region,
                        lines,
                        tracker: PatternTracker::new(),
                        is_hot: false,
                        access_frequency: 0.0,
                    });
                }
                Err(err) => debug!("{} cache region ({}) unavailable: {}", level, format_bytes(size), err),
            }
        }
        Self { regions, line_size }
    }

    pub fn line_size(&self) -> usize {
        self.line_size
    }

    /// First-fit line-aligned placement in the smallest level that can hold
    /// `size`. Returns the region index and address.
    ///
    /// Alignments above a page cannot be met from these regions.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<(usize, usize)> {
        if alignment > page_size() {
            return None;
        }
        let count = lines_for(size, self.line_size)?;
        let step = (alignment / self.line_size).max(1);

        for (index, cache) in self.regions.iter_mut().enumerate() {
            if count > cache.lines.len() {
                continue;
            }
            if let Some(start) = cache.lines.find_clear_run(count, step) {
                cache.lines.set_range(start, count);
                return Some((index, cache.region.base() + start * self.line_size));
            }
        }
        None
    }

    /// Release the lines behind `[addr, addr + size)` in region `index`.
    pub fn deallocate(&mut self, index: usize, addr: usize, size: usize) {
        let line_size = self.line_size;
        if let Some(cache) = self.regions.get_mut(index) {
            let start = (addr - cache.region.base()) / line_size;
            if let Some(count) = lines_for(size, line_size) {
                cache.lines.clear_range(start, count);
            }
        }
    }

    /// Fold an access into the profile of the region containing `addr`.
    pub fn record_access(&mut self, addr: usize) -> bool {
        match self.regions.iter_mut().find(|c| c.region.contains(addr)) {
            Some(cache) => {
                cache.tracker.record(addr);
                cache.access_frequency += 1.0;
                true
            }
            None => false,
        }
    }

    /// Per-tick frequency decay and hot-flag refresh.
    pub fn decay(&mut self) {
        for cache in &mut self.regions {
            cache.access_frequency *= FREQUENCY_DECAY;
            cache.is_hot = cache.access_frequency >= HOT_FREQUENCY;
        }
    }

    /// `(last_address, stride, locality)` for regions walking with a
    /// detectable stride.
    pub fn stride_hints(&self) -> Vec<(usize, isize, Locality)> {
        self.regions
            .iter()
            .filter(|c| matches!(c.tracker.pattern(), AccessPattern::Sequential | AccessPattern::Strided))
            .filter_map(|c| Some((c.tracker.last_address()?, c.tracker.stride()?, c.level.locality())))
            .collect()
    }

    pub fn snapshots(&self) -> Vec<CacheRegionSnapshot> {
        self.regions
            .iter()
            .map(|c| CacheRegionSnapshot {
                level: c.level,
                base_address: c.region.base(),
                size: c.region.len(),
                line_size: self.line_size,
                used_lines: c.lines.count_ones(),
                total_lines: c.lines.len(),
                access_pattern: c.tracker.pattern(),
                is_hot: c.is_hot,
                access_frequency: c.access_frequency,
            })
            .collect()
    }
}
