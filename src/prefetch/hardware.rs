//! Platform prefetch instructions.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{_mm_prefetch, _MM_HINT_NTA, _MM_HINT_T0, _MM_HINT_T1, _MM_HINT_T2};

/// Temporal locality of a prefetch, `0` (non-temporal) to `3` (keep in L1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locality(u8);

impl Locality {
    /// Non-temporal: fetch without polluting the cache hierarchy.
    pub const NONE: Self = Self(0);
    /// Keep in the last-level cache.
    pub const LOW: Self = Self(1);
    /// Keep in L2 and above.
    pub const MODERATE: Self = Self(2);
    /// Keep in every level.
    pub const HIGH: Self = Self(3);

    /// Clamp `level` into `0..=3`.
    pub const fn new(level: u8) -> Self {
        if level > 3 {
            Self(3)
        } else {
            Self(level)
        }
    }

    pub const fn level(self) -> u8 {
        self.0
    }
}

/// Prefetch the cache line holding `addr`.
///
/// Prefetches are hints and never fault, so any address is acceptable.
#[inline(always)]
pub fn prefetch(addr: usize, locality: Locality) {
    #[cfg(target_arch = "x86_64")]
    {
        let ptr = addr as *const i8;
        // SAFETY: prefetch instructions do not access memory architecturally.
        unsafe {
            match locality.level() {
                0 => _mm_prefetch::<{ _MM_HINT_NTA }>(ptr),
                1 => _mm_prefetch::<{ _MM_HINT_T2 }>(ptr),
                2 => _mm_prefetch::<{ _MM_HINT_T1 }>(ptr),
                _ => _mm_prefetch::<{ _MM_HINT_T0 }>(ptr),
            }
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (addr, locality);
    }
}

/// Prefetch up to eight lines starting at `base`, `stride` bytes apart.
#[inline]
pub fn prefetch_run(base: usize, count: usize, stride: usize, locality: Locality) {
    for i in 0..count.min(8) {
        prefetch(base.wrapping_add(i * stride), locality);
    }
}

/// Whether prefetch instructions are emitted on this target.
pub fn is_supported() -> bool {
    cfg!(target_arch = "x86_64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locality_clamps() {
        assert_eq!(Locality::new(9), Locality::HIGH);
        assert_eq!(Locality::new(0).level(), 0);
        assert!(Locality::LOW < Locality::MODERATE);
    }

    #[test]
    fn test_prefetch_any_address() {
        let data = [0u8; 256];
        prefetch_run(data.as_ptr() as usize, 4, 64, Locality::HIGH);
        prefetch(0, Locality::NONE);
    }
}
