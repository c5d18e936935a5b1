//! Memory poisoning for debugging.
//!
//! Freed pool, cache and heap blocks are filled with a known pattern so a
//! use-after-free reads obviously bogus data.

/// Pattern written over freed memory.
pub const FREED_PATTERN: u8 = 0xCD;

/// Poison a region of memory with the freed pattern.
///
/// # Safety
///
/// The memory region must be valid and writable.
pub unsafe fn poison_freed(ptr: *mut u8, size: usize) {
    std::ptr::write_bytes(ptr, FREED_PATTERN, size);
}

/// Returns true if all bytes match the freed pattern.
///
/// # Safety
///
/// The memory region must be valid for reads.
pub unsafe fn is_freed_poison(ptr: *const u8, size: usize) -> bool {
    std::slice::from_raw_parts(ptr, size)
        .iter()
        .all(|&b| b == FREED_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_roundtrip() {
        let mut buf = [0u8; 32];
        unsafe {
            assert!(!is_freed_poison(buf.as_ptr(), buf.len()));
            poison_freed(buf.as_mut_ptr(), buf.len());
            assert!(is_freed_poison(buf.as_ptr(), buf.len()));
        }
    }
}
