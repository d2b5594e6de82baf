//! [`SpaceProvider`] trait and structures that implement it.
//!
//! The [`SpaceProvider`] trait lets the allocators in
//! [`secmalloc::allocators`](crate::allocators) obtain page-granular memory without knowing
//! where it comes from. Every block gets its own region, so providers never have to
//! manage a contiguous heap.

use super::header::HEADER_ALIGN;
use super::util::find_divisible;

use core::ptr::{null_mut, NonNull};

use libc::{mmap, munmap, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use static_assertions::const_assert;

/// Used when `sysconf` can not report a page size.
const FALLBACK_PAGE_SIZE: usize = 4096;

// Mappings start on a page boundary, which must satisfy the header alignment.
const_assert!(FALLBACK_PAGE_SIZE % HEADER_ALIGN == 0);

/// A source of zero-initialized, readable and writable memory regions.
///
/// # Safety
/// * regions returned by [`acquire`](SpaceProvider::acquire) must be at least as long as
///   requested, aligned to at least 16 bytes, zero-filled and must not overlap any other live region.
/// * copying or moving the provider must not invalidate regions it handed out.
pub unsafe trait SpaceProvider {
    /// Acquires a region of at least `size` bytes.
    /// Returns the region start and its real length, or `Err(())` if the system refused.
    ///
    /// # Safety
    /// `size` must be non-zero.
    unsafe fn acquire(&mut self, size: usize) -> Result<(NonNull<u8>, usize), ()>;

    /// Returns a region to the system.
    ///
    /// # Safety
    /// `region` and `size` must be exactly what a previous [`acquire`](SpaceProvider::acquire)
    /// returned, and the region must not be released twice.
    unsafe fn release(&mut self, region: NonNull<u8>, size: usize);
}

/// A provider backing every region with its own anonymous private mapping.
#[derive(Debug)]
pub struct MmapProvider {
    page_size: usize,
}

impl MmapProvider {
    /// Creates a provider. The page size is queried on first use.
    #[inline(always)]
    pub const fn new() -> Self {
        MmapProvider { page_size: 0 }
    }

    /// Returns the system page size, caching it on first call.
    pub fn page_size(&mut self) -> usize {
        if self.page_size == 0 {
            let size = unsafe { sysconf(libc::_SC_PAGESIZE) };
            self.page_size = match usize::try_from(size) {
                Ok(size) if size.is_power_of_two() && size % HEADER_ALIGN == 0 => size,
                _ => FALLBACK_PAGE_SIZE,
            };
        }
        self.page_size
    }
}

impl Default for MmapProvider {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl SpaceProvider for MmapProvider {
    unsafe fn acquire(&mut self, size: usize) -> Result<(NonNull<u8>, usize), ()> {
        debug_assert_ne!(size, 0);
        let span = find_divisible(size, self.page_size()).ok_or(())?;
        let region = unsafe {
            mmap(
                null_mut(),
                span,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if region == MAP_FAILED {
            return Err(());
        }
        Ok((NonNull::new(region.cast()).ok_or(())?, span))
    }

    unsafe fn release(&mut self, region: NonNull<u8>, size: usize) {
        let ret = unsafe { munmap(region.as_ptr().cast(), size) };
        debug_assert_eq!(ret, 0, "munmap() on a region we mapped should never fail.");
    }
}

unsafe impl<T: SpaceProvider + ?Sized> SpaceProvider for &mut T {
    unsafe fn acquire(&mut self, size: usize) -> Result<(NonNull<u8>, usize), ()> {
        (**self).acquire(size)
    }

    unsafe fn release(&mut self, region: NonNull<u8>, size: usize) {
        (**self).release(region, size)
    }
}
