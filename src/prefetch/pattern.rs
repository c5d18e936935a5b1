//! Access pattern classification over a short address history.

use std::collections::VecDeque;

/// Samples kept per tracker.
pub const HISTORY_LEN: usize = 16;

/// Fewer samples than this classify as `Random`.
const MIN_SAMPLES: usize = 4;

/// Deltas at or below this are treated as walking adjacent lines.
const SEQUENTIAL_STRIDE: usize = 64;

/// Addresses within this span count as spatially clustered.
const SPATIAL_SPAN: usize = 4096;

/// Dominant access pattern of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessPattern {
    /// Monotonic walk over adjacent cache lines.
    Sequential,
    /// No recognisable structure.
    #[default]
    Random,
    /// Monotonic walk with a fixed step larger than a line.
    Strided,
    /// Almost every access hits the same one or two addresses.
    Hotspot,
    /// A small working set revisited over time.
    Temporal,
    /// Scattered accesses clustered within one page.
    Spatial,
}

impl std::fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessPattern::Sequential => "sequential",
            AccessPattern::Random => "random",
            AccessPattern::Strided => "strided",
            AccessPattern::Hotspot => "hotspot",
            AccessPattern::Temporal => "temporal",
            AccessPattern::Spatial => "spatial",
        };
        f.write_str(name)
    }
}

/// Rolling address history with a cached classification.
#[derive(Debug, Clone, Default)]
pub struct PatternTracker {
    history: VecDeque<usize>,
    pattern: AccessPattern,
    stride: Option<isize>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(&self) -> AccessPattern {
        self.pattern
    }

    /// Dominant step between accesses when the pattern is sequential or strided.
    pub fn stride(&self) -> Option<isize> {
        self.stride
    }

    pub fn last_address(&self) -> Option<usize> {
        self.history.back().copied()
    }

    /// Record an access and reclassify.
    pub fn record(&mut self, addr: usize) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(addr);
        let (pattern, stride) = classify(self.history.make_contiguous());
        self.pattern = pattern;
        self.stride = stride;
    }
}

/// Classify an address sequence, returning the pattern and, for monotonic
/// walks, the dominant stride.
pub fn classify(addrs: &[usize]) -> (AccessPattern, Option<isize>) {
    if addrs.len() < MIN_SAMPLES {
        return (AccessPattern::Random, None);
    }

    let deltas: Vec<isize> = addrs
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]) as isize)
        .collect();

    // Most frequent non-zero delta and how often it occurs.
    let mut dominant = (0isize, 0usize);
    for &candidate in deltas.iter().filter(|d| **d != 0) {
        let count = deltas.iter().filter(|d| **d == candidate).count();
        if count > dominant.1 {
            dominant = (candidate, count);
        }
    }
    let (stride, hits) = dominant;
    if hits * 4 >= deltas.len() * 3 {
        let pattern = if stride.unsigned_abs() <= SEQUENTIAL_STRIDE {
            AccessPattern::Sequential
        } else {
            AccessPattern::Strided
        };
        return (pattern, Some(stride));
    }

    let mut distinct = addrs.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    if distinct.len() <= 2 {
        return (AccessPattern::Hotspot, None);
    }
    if distinct.len() * 2 <= addrs.len() {
        return (AccessPattern::Temporal, None);
    }
    let span = distinct[distinct.len() - 1] - distinct[0];
    if span <= SPATIAL_SPAN {
        return (AccessPattern::Spatial, None);
    }
    (AccessPattern::Random, None)
}
