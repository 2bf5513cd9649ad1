//! Region manager: anonymous page mappings obtained directly from the OS.
//!
//! Grounded in the `libc`-based `mmap`/`munmap` usage shown throughout the
//! retrieval pack's userspace allocators (e.g. `jgespiga-memalloc`'s
//! `src/mmap.rs`) and in the cross-platform page/region primitives of the
//! `region` crate (`SamuraiCrow-region-rs`), adapted to the single Unix
//! anonymous-mapping path this allocator needs.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::block::Block;
use crate::error::{RegionError, Result};

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The OS page size, queried once and cached.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: `sysconf` with `_SC_PAGE_SIZE` has no preconditions.
    let queried = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    let size = if queried > 0 { queried as usize } else { 4096 };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Rounds `size` up to the smallest multiple of the page size that is `>= size`.
pub fn round_up_to_page(size: usize) -> usize {
    let page = page_size();
    let pages = size / page + usize::from(size % page != 0);
    pages * page
}

/// Maps a fresh, zero-initialized, anonymous, private, read/write region of
/// exactly `region_size` bytes (which must already be a multiple of the page
/// size) and returns it as an uninitialized block header slot.
///
/// The caller is responsible for writing a valid `Block` at the returned
/// address before it is observed by any other part of the allocator.
pub fn map_region(region_size: usize) -> Result<NonNull<Block>> {
    if region_size == 0 {
        return Err(RegionError::ZeroSizeRequest);
    }

    // SAFETY: all arguments are valid for an anonymous, fixed-size mapping;
    // `MAP_FAILED` and a null dereference are both checked below.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            region_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(RegionError::MapFailed {
            size: region_size,
            source: io::Error::last_os_error(),
        });
    }

    // SAFETY: `mmap` succeeded, so `addr` is a valid, non-null, page-aligned
    // pointer to `region_size` freshly mapped bytes.
    Ok(unsafe { NonNull::new_unchecked(addr.cast::<Block>()) })
}

/// Releases a whole region back to the OS.
///
/// # Safety
/// `start` and `size` must be exactly the address and length returned by a
/// prior [`map_region`] call, and no live references into the region may
/// remain after this call returns.
pub unsafe fn unmap_region(start: NonNull<Block>, size: usize) -> Result<()> {
    // SAFETY: caller guarantees `start`/`size` describe a mapping created by
    // `map_region` and that nothing still references it.
    let result = unsafe { libc::munmap(start.as_ptr().cast(), size) };
    if result != 0 {
        return Err(RegionError::UnmapFailed {
            addr: start.as_ptr() as usize,
            size,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_sane_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn round_up_to_page_is_idempotent_on_a_page_multiple() {
        let page = page_size();
        assert_eq!(round_up_to_page(page), page);
        assert_eq!(round_up_to_page(page * 3), page * 3);
    }

    #[test]
    fn round_up_to_page_rounds_partial_pages() {
        let page = page_size();
        assert_eq!(round_up_to_page(1), page);
        assert_eq!(round_up_to_page(page + 1), page * 2);
    }

    #[test]
    fn map_region_rejects_zero_size() {
        assert!(matches!(map_region(0), Err(RegionError::ZeroSizeRequest)));
    }

    #[test]
    fn map_and_unmap_round_trip() {
        let page = page_size();
        let block = map_region(page).expect("mapping should succeed");
        // SAFETY: freshly mapped, nothing else references it.
        unsafe {
            assert!(unmap_region(block, page).is_ok());
        }
    }
}
