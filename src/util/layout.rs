//! Alignment arithmetic shared by the allocation tiers.

use std::alloc::Layout;

use crate::api::error::{AllocError, AllocResult};

/// Smallest alignment handed out by any tier.
pub const MIN_ALIGN: usize = 16;

/// Round `value` up to a multiple of `align` (power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] for sizes supplied by callers. `None` when rounding would
/// overflow.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Largest power of two dividing `addr`. Zero is treated as maximally aligned.
#[inline]
pub const fn natural_alignment(addr: usize) -> usize {
    if addr == 0 {
        1 << (usize::BITS - 1)
    } else {
        1 << addr.trailing_zeros()
    }
}

/// Reject non-power-of-two alignments and normalise tiny ones.
pub fn check_alignment(alignment: usize) -> AllocResult<usize> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(AllocError::InvalidAlignment { alignment });
    }
    Ok(alignment.max(MIN_ALIGN))
}

/// Build a heap layout, treating zero-sized requests as one byte.
pub fn heap_layout(size: usize, alignment: usize) -> AllocResult<Layout> {
    Layout::from_size_align(size.max(1), alignment)
        .map_err(|_| AllocError::OutOfMemory { size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(4000, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(4097, 4096), Some(8192));
        assert_eq!(checked_align_up(usize::MAX - 10, 4096), None);
        assert_eq!(checked_align_up(usize::MAX, 1), Some(usize::MAX));
    }

    #[test]
    fn test_natural_alignment() {
        assert_eq!(natural_alignment(4096), 4096);
        assert_eq!(natural_alignment(4096 + 1024), 1024);
        assert_eq!(natural_alignment(3), 1);
    }

    #[test]
    fn test_check_alignment() {
        assert_eq!(check_alignment(1).unwrap(), MIN_ALIGN);
        assert_eq!(check_alignment(256).unwrap(), 256);
        assert!(matches!(
            check_alignment(48),
            Err(AllocError::InvalidAlignment { alignment: 48 })
        ));
        assert!(check_alignment(0).is_err());
    }
}
