//! Hotspot tracking and prefetch hint management.
//!
//! Accesses are folded in once per tick: each tick raises the temperature
//! of touched blocks, activates blocks that crossed the hotspot threshold,
//! decays everything and re-issues prefetches for active hints and hot
//! blocks.

use std::collections::{BTreeMap, HashMap};

use log::trace;

use super::hardware::{self, Locality};

/// Temperature added per access.
const TEMPERATURE_STEP: f64 = 0.1;

/// Per-tick temperature decay.
const TEMPERATURE_DECAY: f64 = 0.95;

/// Hotspots colder than this are dropped.
const TEMPERATURE_FLOOR: f64 = 0.1;

/// Effectiveness of a fresh hint.
const INITIAL_EFFECTIVENESS: f64 = 0.5;

/// Effectiveness added per hit.
const EFFECTIVENESS_STEP: f64 = 0.1;

/// Per-tick decay for hints that saw no hit.
const EFFECTIVENESS_DECAY: f64 = 0.9;

/// Hints below this are removed.
const EFFECTIVENESS_FLOOR: f64 = 0.1;

/// Bytes covered past a hint's target.
const HINT_WINDOW: usize = 64;

/// A caller- or pattern-supplied prefetch request.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchHint {
    pub base_address: usize,
    /// Distance from `base_address` to the prefetched line.
    pub offset: isize,
    pub locality: Locality,
    pub is_active: bool,
    /// Running hit score in `[0, 1]`.
    pub effectiveness: f64,
    /// Derived from a detected access pattern.
    pub derived: bool,
}

impl PrefetchHint {
    fn new(base_address: usize, offset: isize, locality: Locality, derived: bool) -> Self {
        Self {
            base_address,
            offset,
            locality,
            is_active: true,
            effectiveness: INITIAL_EFFECTIVENESS,
            derived,
        }
    }

    pub fn target(&self) -> usize {
        self.base_address.wrapping_add(self.offset as usize)
    }

    /// True if `addr` falls between the base and the end of the target line.
    pub fn covers(&self, addr: usize) -> bool {
        let target = self.target();
        let lo = self.base_address.min(target);
        let hi = self.base_address.max(target).saturating_add(HINT_WINDOW);
        addr >= lo && addr < hi
    }
}

/// A block with elevated, decaying access frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct HotSpot {
    pub address: usize,
    pub size: usize,
    /// Heat in `[0, 1]`.
    pub temperature: f64,
    pub access_count: u64,
    pub is_active: bool,
}

impl HotSpot {
    fn contains(&self, addr: usize) -> bool {
        addr >= self.address && addr < self.address + self.size.max(1)
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub accesses: usize,
    pub hits: usize,
    pub active_hotspots: usize,
    pub hints_removed: usize,
}

/// Prefetch state; lives behind the allocator's prefetch mutex.
pub struct PrefetchEngine {
    hints: BTreeMap<usize, PrefetchHint>,
    hotspots: BTreeMap<usize, HotSpot>,
    /// Accesses per block during the current tick.
    tick_counts: HashMap<usize, u32>,
    /// Hints hit during the current tick.
    tick_hits: Vec<usize>,
    tick: TickReport,
    hotspot_threshold: u32,
    issue_prefetches: bool,
    total_accesses: u64,
    total_hits: u64,
}

impl PrefetchEngine {
    pub fn new(hotspot_threshold: u32, issue_prefetches: bool) -> Self {
        Self {
            hints: BTreeMap::new(),
            hotspots: BTreeMap::new(),
            tick_counts: HashMap::new(),
            tick_hits: Vec::new(),
            tick: TickReport::default(),
            hotspot_threshold: hotspot_threshold.max(1),
            issue_prefetches: issue_prefetches && hardware::is_supported(),
            total_accesses: 0,
            total_hits: 0,
        }
    }

    /// Register or replace the hint anchored at `base_address`.
    pub fn add_hint(&mut self, base_address: usize, offset: isize, locality: Locality) {
        self.hints
            .insert(base_address, PrefetchHint::new(base_address, offset, locality, false));
    }

    pub fn remove_hint(&mut self, base_address: usize) -> bool {
        self.hints.remove(&base_address).is_some()
    }

    /// Install a hint derived from a detected stride, anchored at the last
    /// observed address. Caller hints at the same anchor win.
    pub fn derive_hint(&mut self, last_address: usize, stride: isize, locality: Locality) {
        match self.hints.get(&last_address) {
            Some(existing) if !existing.derived => {}
            _ => {
                self.hints
                    .insert(last_address, PrefetchHint::new(last_address, stride, locality, true));
            }
        }
    }

    pub fn hints(&self) -> Vec<PrefetchHint> {
        self.hints.values().cloned().collect()
    }

    pub fn hotspots(&self) -> Vec<HotSpot> {
        self.hotspots.values().cloned().collect()
    }

    /// Active hotspots hotter than `temperature`.
    pub fn hot_blocks(&self, temperature: f64) -> Vec<(usize, usize)> {
        self.hotspots
            .values()
            .filter(|h| h.is_active && h.temperature > temperature)
            .map(|h| (h.address, h.size))
            .collect()
    }

    /// Fold one access into the current tick. `block` is the containing
    /// allocation `(address, size)` if there is one.
    pub fn observe(&mut self, addr: usize, block: Option<(usize, usize)>) {
        self.tick.accesses += 1;
        self.total_accesses += 1;

        let mut hit = false;
        for (&base, hint) in self.hints.iter_mut() {
            if hint.is_active && hint.covers(addr) {
                hint.effectiveness = (hint.effectiveness + EFFECTIVENESS_STEP).min(1.0);
                self.tick_hits.push(base);
                hit = true;
            }
        }
        if !hit {
            hit = self.hotspots.values().any(|h| h.is_active && h.contains(addr));
        }
        if hit {
            self.tick.hits += 1;
            self.total_hits += 1;
        }

        if let Some((address, size)) = block {
            let spot = self.hotspots.entry(address).or_insert(HotSpot {
                address,
                size,
                temperature: 0.0,
                access_count: 0,
                is_active: false,
            });
            spot.temperature = (spot.temperature + TEMPERATURE_STEP).min(1.0);
            spot.access_count += 1;
            *self.tick_counts.entry(address).or_insert(0) += 1;
        }
    }

    /// Close the tick: activate, decay, prune and issue prefetches.
    pub fn end_tick(&mut self) -> TickReport {
        let threshold = self.hotspot_threshold;
        for (address, count) in self.tick_counts.drain() {
            if count >= threshold {
                if let Some(spot) = self.hotspots.get_mut(&address) {
                    spot.is_active = true;
                }
            }
        }
        self.hotspots.retain(|_, spot| {
            spot.temperature *= TEMPERATURE_DECAY;
            spot.temperature >= TEMPERATURE_FLOOR
        });

        let hit_bases = std::mem::take(&mut self.tick_hits);
        let before = self.hints.len();
        self.hints.retain(|base, hint| {
            if !hit_bases.contains(base) {
                hint.effectiveness *= EFFECTIVENESS_DECAY;
            }
            hint.effectiveness >= EFFECTIVENESS_FLOOR
        });

        if self.issue_prefetches {
            for hint in self.hints.values().filter(|h| h.is_active) {
                hardware::prefetch(hint.target(), hint.locality);
            }
            for spot in self.hotspots.values().filter(|h| h.is_active) {
                hardware::prefetch_run(spot.address, (spot.size / 64).max(1), 64, Locality::HIGH);
            }
        }

        let mut report = std::mem::take(&mut self.tick);
        report.hints_removed = before - self.hints.len();
        report.active_hotspots = self.hotspots.values().filter(|h| h.is_active).count();
        trace!(
            "prefetch tick: {} accesses, {} hits, {} active hotspots",
            report.accesses,
            report.hits,
            report.active_hotspots
        );
        report
    }

    /// Drop hints and hotspots anchored inside a freed block.
    pub fn forget_block(&mut self, address: usize, size: usize) {
        let end = address + size.max(1);
        self.hotspots.retain(|&a, _| a < address || a >= end);
        self.hints.retain(|&a, _| a < address || a >= end);
    }

    /// Fraction of accesses that hit an active hint or hotspot.
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            return 0.0;
        }
        self.total_hits as f64 / self.total_accesses as f64
    }

    pub fn reset_counters(&mut self) {
        self.total_accesses = 0;
        self.total_hits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotspot_activates_at_threshold() {
        let mut engine = PrefetchEngine::new(4, false);
        for _ in 0..3 {
            engine.observe(0x1010, Some((0x1000, 256)));
        }
        engine.end_tick();
        assert!(!engine.hotspots()[0].is_active);

        for _ in 0..4 {
            engine.observe(0x1010, Some((0x1000, 256)));
        }
        let report = engine.end_tick();
        assert_eq!(report.active_hotspots, 1);
        let spot = &engine.hotspots()[0];
        assert!(spot.is_active);
        assert_eq!(spot.access_count, 7);
        assert!(spot.temperature <= 1.0);
    }

    #[test]
    fn test_hot_blocks_filter_by_temperature() {
        let mut engine = PrefetchEngine::new(4, false);
        for _ in 0..10 {
            engine.observe(0x1000, Some((0x1000, 64)));
        }
        for _ in 0..5 {
            engine.observe(0x2000, Some((0x2000, 64)));
        }
        engine.end_tick();

        // 1.0 and 0.5 before the tick's decay: 0.95 and 0.475 after.
        assert_eq!(engine.hot_blocks(0.8), vec![(0x1000, 64)]);
        assert_eq!(engine.hot_blocks(0.4).len(), 2);
    }

    #[test]
    fn test_hotspot_cools_and_drops() {
        let mut engine = PrefetchEngine::new(1, false);
        engine.observe(0x2000, Some((0x2000, 64)));
        engine.observe(0x2000, Some((0x2000, 64)));
        engine.end_tick();
        assert_eq!(engine.hotspots().len(), 1);

        // 0.2 * 0.95^n drops under 0.1 within 14 more ticks.
        for _ in 0..14 {
            engine.end_tick();
        }
        assert!(engine.hotspots().is_empty());
    }

    #[test]
    fn test_hint_effectiveness_tracks_hits() {
        let mut engine = PrefetchEngine::new(8, false);
        engine.add_hint(0x4000, 128, Locality::HIGH);

        engine.observe(0x4080, None);
        let report = engine.end_tick();
        assert_eq!(report.hits, 1);
        assert!((engine.hints()[0].effectiveness - 0.6).abs() < 1e-9);
        assert_eq!(engine.hit_rate(), 1.0);

        engine.observe(0x9000, None);
        engine.end_tick();
        assert!((engine.hit_rate() - 0.5).abs() < 1e-9);

        // Idle ticks decay the hint until it is pruned.
        for _ in 0..20 {
            engine.end_tick();
        }
        assert!(engine.hints().is_empty());
    }

    #[test]
    fn test_derived_hint_never_replaces_caller_hint() {
        let mut engine = PrefetchEngine::new(8, false);
        engine.add_hint(0x100, 64, Locality::LOW);
        engine.derive_hint(0x100, 4096, Locality::HIGH);
        assert_eq!(engine.hints()[0].offset, 64);

        engine.derive_hint(0x800, -64, Locality::HIGH);
        let derived = engine.hints().into_iter().find(|h| h.derived).unwrap();
        assert!(derived.covers(0x7c0));
        assert!(!derived.covers(0x900));
    }

    #[test]
    fn test_forget_block_drops_state() {
        let mut engine = PrefetchEngine::new(1, false);
        engine.observe(0x3000, Some((0x3000, 64)));
        engine.add_hint(0x3010, 64, Locality::HIGH);
        engine.forget_block(0x3000, 64);
        assert!(engine.hotspots().is_empty());
        assert!(engine.hints().is_empty());
    }
}
