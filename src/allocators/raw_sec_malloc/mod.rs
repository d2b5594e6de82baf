//! A singlethreaded memory allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Pointer validation
// Every pointer coming back from a caller is looked up in the directory by address
// before anything is read through it. Only then is the header trusted and the trailing
// canary compared, so a foreign or stale pointer is never dereferenced.
//
// ## Failure atomicity
// Operations check everything that can fail before mutating the directory. A failed
// `try_resize` leaves the original block exactly as it was.

use crate::canary::{CanarySource, LcgCanary};
use crate::config::{Config, ReleasePolicy};
use crate::diagnostics::reported;
use crate::directory::Directory;
use crate::error::Error;
use crate::header::{Header, HEADER_ALIGN};
use crate::providers::{MmapProvider, SpaceProvider};
use crate::util::{block_footprint, raw_ptr};

use core::cell::UnsafeCell;
use core::ptr::{copy_nonoverlapping, NonNull};
use std::fmt::Debug;

use tracing::debug;

/// A single threaded memory allocator.
///
/// Owns a directory of blocks, the [`SpaceProvider`] they are mapped from and the
/// [`CanarySource`] stamping them. Independent instances share nothing.
pub struct RawSecMalloc<P: SpaceProvider = MmapProvider, C: CanarySource = LcgCanary> {
    config: Config,
    directory: UnsafeCell<Directory>,
    provider: UnsafeCell<P>,
    canaries: UnsafeCell<C>,
}

// Blocks are owned by the allocator alone, moving it moves ownership of every mapping.
unsafe impl<P: SpaceProvider + Send, C: CanarySource + Send> Send for RawSecMalloc<P, C> {}

impl<P: SpaceProvider, C: CanarySource> Debug for RawSecMalloc<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let directory = unsafe { &*self.directory.get() };
        f.debug_struct("RawSecMalloc")
            .field("config", &self.config)
            .field("blocks", &directory.len())
            .field("free", &directory.free_count())
            .finish()
    }
}

impl<P: SpaceProvider, C: CanarySource> RawSecMalloc<P, C> {
    /// Creates an allocator instance mapping blocks from `provider`
    /// and stamping them with canaries from `canaries`.
    pub const fn new(provider: P, canaries: C, config: Config) -> Self {
        RawSecMalloc {
            config,
            directory: UnsafeCell::new(Directory::new()),
            provider: UnsafeCell::new(provider),
            canaries: UnsafeCell::new(canaries),
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Returns a pointer to `size` usable bytes, or null if the request is invalid
    /// or no memory could be mapped.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        raw_ptr(reported("allocate", self.try_allocate(size)).ok())
    }

    /// Like [`allocate`](Self::allocate), with the returned pointer a multiple of `align`.
    /// A non power of two `align` is reported and yields null.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        raw_ptr(reported("allocate_aligned", self.try_allocate_aligned(size, align)).ok())
    }

    /// Releases a pointer returned by this allocator.
    /// Null, unknown and corrupted pointers are reported and otherwise ignored.
    pub fn release(&self, ptr: *mut u8) {
        let _ = reported("release", self.try_release(ptr));
    }

    /// Allocates `count * size` bytes and zeroes them.
    pub fn zeroed_allocate(&self, count: usize, size: usize) -> *mut u8 {
        raw_ptr(reported("zeroed_allocate", self.try_zeroed_allocate(count, size)).ok())
    }

    /// Moves the contents of `ptr` into a new block of `new_size` bytes.
    ///
    /// A null `ptr` allocates, a zero `new_size` releases and returns null.
    /// On failure null is returned and `ptr` stays valid.
    pub fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        raw_ptr(reported("resize", self.try_resize(ptr, new_size)).ok().flatten())
    }

    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, Error> {
        self.try_allocate_aligned(size, HEADER_ALIGN)
    }

    /// Allocates `size` usable bytes starting at a multiple of `align`,
    /// which must be a power of two.
    pub fn try_allocate_aligned(&self, size: usize, align: usize) -> Result<NonNull<u8>, Error> {
        if !align.is_power_of_two() {
            return Err(Error::UnsupportedAlignment { align });
        }
        if size == 0 {
            return Err(Error::InvalidSize { size });
        }
        let align = align.max(HEADER_ALIGN);
        let footprint = block_footprint(size, align).ok_or(Error::InvalidSize { size })?;

        let directory = unsafe { &mut *self.directory.get() };

        if let Some(block) = unsafe { directory.first_fit(size, align) } {
            unsafe { directory.set_free(block, false) };
            let header = unsafe { &*block.as_ptr() };
            debug!(data = ?header.data, capacity = header.size, "Reusing free block.");
            return Ok(unsafe { NonNull::new_unchecked(header.data) });
        }

        debug!(size, align, footprint, "No free block fits, mapping a new one.");
        let block = unsafe { self.map_block(size, align, footprint)? };
        unsafe { directory.push_back(block) };
        let data = unsafe { (*block.as_ptr()).data };
        debug!(?data, blocks = directory.len(), "Block appended.");
        Ok(unsafe { NonNull::new_unchecked(data) })
    }

    pub fn try_release(&self, ptr: *mut u8) -> Result<(), Error> {
        let (prev, block) = unsafe { self.checked_block(ptr)? };
        let directory = unsafe { &mut *self.directory.get() };

        match self.config.release {
            ReleasePolicy::Unmap => unsafe {
                directory.excise(prev, block);
                let (base, span) = ((*block.as_ptr()).base, (*block.as_ptr()).span);
                (*self.provider.get()).release(NonNull::new_unchecked(base), span);
                debug!(?ptr, span, "Block excised and unmapped.");
            },
            ReleasePolicy::Retain => unsafe {
                directory.set_free(block, true);
                debug!(?ptr, "Block retained for reuse.");
            },
        }
        Ok(())
    }

    pub fn try_zeroed_allocate(&self, count: usize, size: usize) -> Result<NonNull<u8>, Error> {
        self.try_zeroed_allocate_aligned(count, size, HEADER_ALIGN)
    }

    pub fn try_zeroed_allocate_aligned(
        &self,
        count: usize,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, Error> {
        let total = count
            .checked_mul(size)
            .ok_or(Error::SizeOverflow { count, size })?;
        let data = self.try_allocate_aligned(total, align)?;
        // Reused blocks hold stale bytes, so the whole capacity is cleared.
        unsafe {
            let capacity = (*Header::from_data(data.as_ptr())).size;
            data.as_ptr().write_bytes(0, capacity);
        }
        Ok(data)
    }

    /// Returns `Ok(None)` when `new_size` is zero and `ptr` was released.
    pub fn try_resize(&self, ptr: *mut u8, new_size: usize) -> Result<Option<NonNull<u8>>, Error> {
        self.try_resize_aligned(ptr, new_size, HEADER_ALIGN)
    }

    /// Like [`try_resize`](Self::try_resize), with the new block aligned to `align`.
    pub fn try_resize_aligned(
        &self,
        ptr: *mut u8,
        new_size: usize,
        align: usize,
    ) -> Result<Option<NonNull<u8>>, Error> {
        if ptr.is_null() {
            return self.try_allocate_aligned(new_size, align).map(Some);
        }
        if new_size == 0 {
            return self.try_release(ptr).map(|()| None);
        }

        let (_, old) = unsafe { self.checked_block(ptr)? };
        let old_size = unsafe { (*old.as_ptr()).size };

        let new = self.try_allocate_aligned(new_size, align)?;
        unsafe { copy_nonoverlapping(ptr, new.as_ptr(), old_size.min(new_size)) };

        let released = self.try_release(ptr);
        debug_assert!(released.is_ok(), "Validated block should release cleanly.");
        debug!(?ptr, new = ?new.as_ptr(), old_size, new_size, "Block moved.");
        Ok(Some(new))
    }

    /// Maps a fresh block able to hold `size` usable bytes aligned to `align`.
    ///
    /// # Safety
    /// `align` must be a power of two no smaller than [`HEADER_ALIGN`] and `footprint`
    /// must be the [`block_footprint`] of `size` and `align`.
    /// Callers must ensure the provider and canary source are not currently borrowed.
    unsafe fn map_block(
        &self,
        size: usize,
        align: usize,
        footprint: usize,
    ) -> Result<NonNull<Header>, Error> {
        let provider = &mut *self.provider.get();
        let (region, span) = provider
            .acquire(footprint)
            .map_err(|()| Error::OutOfMemory { size })?;
        debug_assert!(span >= footprint);

        let base = region.as_ptr();
        let Some(start) = Header::placement(base as usize, align) else {
            provider.release(region, span);
            return Err(Error::OutOfMemory { size });
        };
        // The slack counted by block_footprint keeps the whole block inside the mapping.
        let block_start = base.add(start - base as usize);

        let canary = (*self.canaries.get()).next_canary(block_start);
        let header = Header::init(block_start, size, base, span, canary);
        Ok(NonNull::new_unchecked(header))
    }

    /// Looks `ptr` up and checks that its block is occupied and its canary intact.
    /// Returns the block and its predecessor in the directory.
    ///
    /// # Safety
    /// Callers must ensure the directory is not currently mutably borrowed.
    unsafe fn checked_block(&self, ptr: *mut u8) -> Result<(*mut Header, NonNull<Header>), Error> {
        if ptr.is_null() {
            return Err(Error::NullPointer);
        }
        let addr = ptr as usize;
        let directory = &*self.directory.get();

        let (prev, block) = directory
            .find(ptr)
            .ok_or(Error::UnknownPointer { addr })?;
        let header = &*block.as_ptr();

        if header.free {
            return Err(Error::DoubleRelease { addr });
        }
        let found = header.trailing_canary();
        if found != header.canary {
            return Err(Error::IntegrityViolation {
                addr,
                expected: header.canary,
                found,
            });
        }
        Ok((prev, block))
    }

    /// Returns the address of the trailing canary of the live block owning `ptr`.
    ///
    /// Lets tests corrupt a canary on purpose.
    #[cfg(any(test, feature = "debug-hooks"))]
    pub fn canary_slot(&self, ptr: *mut u8) -> Option<NonNull<u8>> {
        let directory = unsafe { &*self.directory.get() };
        let (_, block) = unsafe { directory.find(ptr)? };
        NonNull::new(unsafe { (*block.as_ptr()).canary_slot() })
    }
}

#[cfg(test)]
impl<P: SpaceProvider, C: CanarySource> RawSecMalloc<P, C> {
    pub(crate) fn block_count(&self) -> usize {
        unsafe { (*self.directory.get()).len() }
    }

    /// Occupancy of the record owning `ptr`, `None` if there is no such record.
    pub(crate) fn is_free(&self, ptr: *mut u8) -> Option<bool> {
        let directory = unsafe { &*self.directory.get() };
        unsafe { directory.find(ptr).map(|(_, block)| (*block.as_ptr()).free) }
    }

    pub(crate) fn capacity(&self, ptr: *mut u8) -> Option<usize> {
        let directory = unsafe { &*self.directory.get() };
        unsafe { directory.find(ptr).map(|(_, block)| (*block.as_ptr()).size) }
    }

    pub(crate) fn provider(&self) -> &P {
        unsafe { &*self.provider.get() }
    }
}

impl<P: SpaceProvider, C: CanarySource> Drop for RawSecMalloc<P, C> {
    fn drop(&mut self) {
        let provider = self.provider.get_mut();
        let mut p = self.directory.get_mut().take();
        while let Some(block) = NonNull::new(p) {
            unsafe {
                p = (*block.as_ptr()).next;
                let (base, span) = ((*block.as_ptr()).base, (*block.as_ptr()).span);
                provider.release(NonNull::new_unchecked(base), span);
            }
        }
    }
}

impl<P: SpaceProvider, C: CanarySource> PartialEq for RawSecMalloc<P, C> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl<P: SpaceProvider, C: CanarySource> Eq for RawSecMalloc<P, C> {}

#[cfg(test)]
mod tests;
