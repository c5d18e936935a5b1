//! Page-granular backing regions.
//!
//! Every pool, NUMA allocation and cache region sits on one of these. On
//! Unix the memory comes straight from `mmap`, which lets us lock pages,
//! advise huge pages, hand pages back to the kernel and bind them to a
//! NUMA node. Elsewhere it degrades to the global allocator.

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::api::error::{AllocError, AllocResult};
use crate::util::layout::{align_up, checked_align_up};

/// System page size, queried once.
pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        #[cfg(unix)]
        {
            // SAFETY: sysconf has no preconditions.
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if size > 0 {
                return size as usize;
            }
        }
        4096
    })
}

/// A contiguous mapping owned by one allocator tier.
pub struct Region {
    /// First usable byte, aligned as requested.
    base: NonNull<u8>,
    /// Usable length starting at `base`.
    len: usize,
    /// Start of the underlying mapping.
    map_ptr: *mut u8,
    /// Length of the underlying mapping.
    map_len: usize,
    /// Alignment the mapping was requested with.
    map_align: usize,
    /// Pages are locked in RAM.
    locked: bool,
}

// SAFETY: Region owns its mapping exclusively; all mutation of the bytes
// happens through raw addresses handed out under the allocator's locks.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map `len` bytes whose start is aligned to `align` (power of two).
    pub fn map(len: usize, align: usize) -> AllocResult<Self> {
        let page = page_size();
        let requested = len;
        let len = checked_align_up(len.max(1), page).ok_or(AllocError::OutOfMemory { size: requested })?;
        let align = align.max(page);
        let map_len = if align > page {
            len.checked_add(align).ok_or(AllocError::OutOfMemory { size: requested })?
        } else {
            len
        };

        // SAFETY: sizes are non-zero and page rounded.
        let map_ptr = unsafe { raw_map(map_len, align) }.ok_or(AllocError::OutOfMemory { size: len })?;
        let aligned = align_up(map_ptr as usize, align);
        let base = NonNull::new(aligned as *mut u8).ok_or(AllocError::OutOfMemory { size: len })?;

        Ok(Self {
            base,
            len,
            map_ptr,
            map_len,
            map_align: align,
            locked: false,
        })
    }

    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True if `addr` falls inside the usable range.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.len
    }

    /// Lock the region's pages in RAM. Returns whether it succeeded.
    pub fn lock(&mut self) -> bool {
        #[cfg(unix)]
        {
            // SAFETY: range is a live mapping owned by self.
            let rc = unsafe { libc::mlock(self.as_ptr() as *const libc::c_void, self.len) };
            self.locked = rc == 0;
        }
        self.locked
    }

    /// Ask the kernel for transparent huge pages. Best effort.
    pub fn advise_huge_pages(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: range is a live mapping owned by self.
            let rc = unsafe {
                libc::madvise(self.as_ptr() as *mut libc::c_void, self.len, libc::MADV_HUGEPAGE)
            };
            rc == 0
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    /// Return the physical pages behind `[offset, offset + len)` to the
    /// kernel. The range stays mapped and reads back as zeroes on Linux.
    ///
    /// Only whole pages inside the range are released. Returns the number
    /// of bytes released.
    pub fn release_range(&self, offset: usize, len: usize) -> usize {
        let page = page_size();
        let start = align_up(self.base() + offset, page);
        let end = (self.base() + offset + len) & !(page - 1);
        if end <= start || self.locked {
            return 0;
        }
        #[cfg(unix)]
        {
            // SAFETY: [start, end) is page aligned and inside our mapping.
            let rc = unsafe {
                libc::madvise(start as *mut libc::c_void, end - start, libc::MADV_DONTNEED)
            };
            if rc == 0 {
                return end - start;
            }
        }
        0
    }

    /// Bind the region to a NUMA node, optionally migrating resident pages.
    pub fn bind_to_node(&self, node: usize, migrate: bool) -> bool {
        bind_range(self.base(), self.len, node, migrate)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: map_ptr/map_len describe the mapping created in `map`.
        unsafe { raw_unmap(self.map_ptr, self.map_len, self.map_align, self.locked) };
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Bind an arbitrary page range to `node` with `mbind`.
#[allow(unused_variables)]
pub fn bind_range(addr: usize, len: usize, node: usize, migrate: bool) -> bool {
    #[cfg(target_os = "linux")]
    {
        const MPOL_BIND: libc::c_long = 2;
        const MPOL_MF_MOVE: libc::c_long = 1 << 1;

        if node >= 64 {
            return false;
        }
        let page = page_size();
        let start = addr & !(page - 1);
        let len = align_up(addr + len, page) - start;
        let mask: u64 = 1 << node;
        let flags = if migrate { MPOL_MF_MOVE } else { 0 };
        // SAFETY: the kernel validates the range; mask outlives the call.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                start as *mut libc::c_void,
                len as libc::c_ulong,
                MPOL_BIND,
                &mask as *const u64,
                65 as libc::c_ulong,
                flags,
            )
        };
        rc == 0
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(unix)]
unsafe fn raw_map(len: usize, _align: usize) -> Option<*mut u8> {
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON | map_noreserve(),
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn map_noreserve() -> libc::c_int {
    libc::MAP_NORESERVE
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn map_noreserve() -> libc::c_int {
    0
}

#[cfg(unix)]
unsafe fn raw_unmap(ptr: *mut u8, len: usize, _align: usize, locked: bool) {
    if locked {
        libc::munlock(ptr as *const libc::c_void, len);
    }
    libc::munmap(ptr as *mut libc::c_void, len);
}

#[cfg(not(unix))]
unsafe fn raw_map(len: usize, align: usize) -> Option<*mut u8> {
    let layout = std::alloc::Layout::from_size_align(len, align).ok()?;
    let ptr = std::alloc::alloc_zeroed(layout);
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

#[cfg(not(unix))]
unsafe fn raw_unmap(ptr: *mut u8, len: usize, align: usize, _locked: bool) {
    let layout = std::alloc::Layout::from_size_align_unchecked(len, align);
    std::alloc::dealloc(ptr, layout);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_page_aligned_and_writable() {
        let region = Region::map(10_000, 64).unwrap();
        assert_eq!(region.base() % page_size(), 0);
        assert!(region.len() >= 10_000);
        unsafe {
            region.as_ptr().write(7);
            region.as_ptr().add(region.len() - 1).write(9);
            assert_eq!(region.as_ptr().read(), 7);
        }
        assert!(region.contains(region.base()));
        assert!(!region.contains(region.base() + region.len()));
    }

    #[test]
    fn test_map_large_alignment() {
        let align = page_size() * 16;
        let region = Region::map(page_size(), align).unwrap();
        assert_eq!(region.base() % align, 0);
    }

    #[test]
    fn test_map_rejects_overflowing_length() {
        assert!(matches!(
            Region::map(usize::MAX - 10, 64),
            Err(AllocError::OutOfMemory { size }) if size == usize::MAX - 10
        ));
        let big = usize::MAX & !(page_size() - 1);
        assert!(Region::map(big, page_size() * 4).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_release_range_zeroes_pages() {
        let page = page_size();
        let region = Region::map(page * 4, page).unwrap();
        unsafe { std::ptr::write_bytes(region.as_ptr(), 0xAA, page * 4) };
        assert_eq!(region.release_range(page, page * 2), page * 2);
        unsafe {
            assert_eq!(region.as_ptr().read(), 0xAA);
            assert_eq!(region.as_ptr().add(page).read(), 0);
        }
    }
}
