//! Allocation routing flags.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Flags passed to [`TieredAlloc::allocate`](crate::TieredAlloc::allocate).
///
/// `CACHE_ALIGNED` wins over `NUMA_LOCAL`; with neither set the request is
/// served by the pool ladder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocFlags(u32);

impl AllocFlags {
    /// Pool ladder with heap fallback.
    pub const NONE: Self = Self(0);
    /// Zero the memory before returning it.
    pub const ZEROED: Self = Self(1 << 0);
    /// Place on the calling thread's NUMA node.
    pub const NUMA_LOCAL: Self = Self(1 << 1);
    /// Serve from the cache-line aligned regions.
    pub const CACHE_ALIGNED: Self = Self(1 << 2);
    /// Fail instead of falling through to the system heap.
    pub const NO_FALLBACK: Self = Self(1 << 3);
    /// Register a prefetch hint for the new block.
    pub const PREFETCH: Self = Self(1 << 4);
    /// Scrub the block when it is freed.
    pub const SECURE: Self = Self(1 << 5);

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AllocFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AllocFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AllocFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for AllocFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(AllocFlags, &str); 6] = [
            (AllocFlags::ZEROED, "ZEROED"),
            (AllocFlags::NUMA_LOCAL, "NUMA_LOCAL"),
            (AllocFlags::CACHE_ALIGNED, "CACHE_ALIGNED"),
            (AllocFlags::NO_FALLBACK, "NO_FALLBACK"),
            (AllocFlags::PREFETCH, "PREFETCH"),
            (AllocFlags::SECURE, "SECURE"),
        ];

        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_and_contains() {
        let flags = AllocFlags::ZEROED | AllocFlags::SECURE;
        assert!(flags.contains(AllocFlags::ZEROED));
        assert!(!flags.contains(AllocFlags::NUMA_LOCAL));
        assert_eq!(format!("{:?}", flags), "ZEROED | SECURE");
        assert_eq!(format!("{:?}", AllocFlags::NONE), "NONE");
    }
}
