//! A multithreaded memory allocator.

use crate::allocators::RawSecMalloc;
use crate::canary::{CanarySource, LcgCanary};
use crate::config::Config;
use crate::diagnostics::{reported, CriticalSection};
use crate::error::Error;
use crate::providers::{MmapProvider, SpaceProvider};
use crate::util::raw_ptr;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use std::sync::{Mutex, PoisonError};

/// A multithreaded memory allocator.
///
/// This allocator is a `Mutex` wrapper over [`RawSecMalloc`]. Each operation holds the lock
/// for its whole directory scan and update, and reports failures only after unlocking.
/// As a [`GlobalAlloc`] it honours the alignment of every [`Layout`].
#[derive(Debug)]
pub struct SecMalloc<P: SpaceProvider = MmapProvider, C: CanarySource = LcgCanary> {
    inner: Mutex<RawSecMalloc<P, C>>,
}

impl<P: SpaceProvider, C: CanarySource> SecMalloc<P, C> {
    pub const fn new(provider: P, canaries: C, config: Config) -> Self {
        SecMalloc {
            inner: Mutex::new(RawSecMalloc::new(provider, canaries, config)),
        }
    }
}

impl SecMalloc<MmapProvider, LcgCanary> {
    /// An allocator backed by anonymous mappings with per-block random canaries.
    ///
    /// ```
    /// use secmalloc::{Config, SecMalloc};
    ///
    /// #[global_allocator]
    /// static ALLOCATOR: SecMalloc = SecMalloc::with_mmap(Config::DEFAULT);
    ///
    /// fn main() {
    ///     let v: Vec<u32> = vec![1, 2, 3];
    ///     assert_eq!(v.iter().sum::<u32>(), 6);
    /// }
    /// ```
    pub const fn with_mmap(config: Config) -> Self {
        Self::new(MmapProvider::new(), LcgCanary::new(), config)
    }
}

impl<P: SpaceProvider, C: CanarySource> SecMalloc<P, C> {
    /// Runs `f` on the inner allocator with the lock held.
    fn locked<R>(&self, f: impl FnOnce(&RawSecMalloc<P, C>) -> R) -> R {
        // A panic while holding the lock can not leave the directory half updated
        // in a way later calls care about, so poisoning is ignored.
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let _section = CriticalSection::enter();
        f(&*inner)
    }

    pub fn allocate(&self, size: usize) -> *mut u8 {
        raw_ptr(reported("allocate", self.try_allocate(size)).ok())
    }

    pub fn release(&self, ptr: *mut u8) {
        let _ = reported("release", self.try_release(ptr));
    }

    pub fn zeroed_allocate(&self, count: usize, size: usize) -> *mut u8 {
        raw_ptr(reported("zeroed_allocate", self.try_zeroed_allocate(count, size)).ok())
    }

    pub fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        raw_ptr(reported("resize", self.try_resize(ptr, new_size)).ok().flatten())
    }

    /// Allocates `size` bytes aligned to `align`, which must be a power of two.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        raw_ptr(reported("allocate_aligned", self.try_allocate_aligned(size, align)).ok())
    }

    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, Error> {
        self.locked(|inner| inner.try_allocate(size))
    }

    pub fn try_release(&self, ptr: *mut u8) -> Result<(), Error> {
        self.locked(|inner| inner.try_release(ptr))
    }

    pub fn try_zeroed_allocate(&self, count: usize, size: usize) -> Result<NonNull<u8>, Error> {
        self.locked(|inner| inner.try_zeroed_allocate(count, size))
    }

    pub fn try_resize(&self, ptr: *mut u8, new_size: usize) -> Result<Option<NonNull<u8>>, Error> {
        self.locked(|inner| inner.try_resize(ptr, new_size))
    }

    pub fn try_allocate_aligned(&self, size: usize, align: usize) -> Result<NonNull<u8>, Error> {
        self.locked(|inner| inner.try_allocate_aligned(size, align))
    }

    pub fn try_zeroed_allocate_aligned(
        &self,
        count: usize,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, Error> {
        self.locked(|inner| inner.try_zeroed_allocate_aligned(count, size, align))
    }

    pub fn try_resize_aligned(
        &self,
        ptr: *mut u8,
        new_size: usize,
        align: usize,
    ) -> Result<Option<NonNull<u8>>, Error> {
        self.locked(|inner| inner.try_resize_aligned(ptr, new_size, align))
    }

    /// Consumes the wrapper and returns the single threaded allocator.
    pub fn into_inner(self) -> RawSecMalloc<P, C> {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

//---------------impl GlobalAlloc for SecMalloc---------------//

unsafe impl<P: SpaceProvider + Send, C: CanarySource + Send> GlobalAlloc for SecMalloc<P, C> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let result = self.try_allocate_aligned(layout.size(), layout.align());
        raw_ptr(reported("alloc", result).ok())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let result = self.try_zeroed_allocate_aligned(1, layout.size(), layout.align());
        raw_ptr(reported("alloc_zeroed", result).ok())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.release(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let result = self.try_resize_aligned(ptr, new_size, layout.align());
        raw_ptr(reported("realloc", result).ok().flatten())
    }
}
