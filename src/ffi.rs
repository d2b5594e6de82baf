//! C entry points, compiled with the `dynamic` feature.
//!
//! Besides the four core functions, `posix_memalign`, `aligned_alloc` and `memalign` are
//! exported so that over-aligned memory is also served, and released, here.
//!
//! Builds the `cdylib` into a drop-in `malloc` replacement that can be preloaded ahead of the
//! platform allocator:
//! ```sh
//! cargo build --release --features dynamic
//! LD_PRELOAD=target/release/libsecmalloc.so MSM_OUTPUT=/tmp/msm.log ls
//! ```

use core::ffi::c_void;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::allocators::SecMalloc;
use crate::config::Config;
use crate::diagnostics;

static ALLOCATOR: SecMalloc = SecMalloc::with_mmap(Config::DEFAULT);

const SINK_UNINIT: u8 = 0;
const SINK_INITIALIZING: u8 = 1;
const SINK_READY: u8 = 2;

static SINK_STATE: AtomicU8 = AtomicU8::new(SINK_UNINIT);

/// Installs the diagnostic sink on first use.
///
/// Installing it allocates, so calls arriving while it is in progress skip straight to
/// the allocator instead of waiting.
#[inline]
fn ensure_sink() {
    if SINK_STATE.load(Ordering::Acquire) == SINK_READY {
        return;
    }
    if SINK_STATE
        .compare_exchange(
            SINK_UNINIT,
            SINK_INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    {
        // Fails only when the host already set a global subscriber, which then gets our events.
        let _ = diagnostics::init();
        SINK_STATE.store(SINK_READY, Ordering::Release);
    }
}

#[inline]
fn set_errno(code: i32) {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location() = code;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = code;
}

#[inline]
fn out_of_memory() {
    set_errno(libc::ENOMEM)
}

#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    ensure_sink();
    let p = ALLOCATOR.allocate(size);
    if p.is_null() && size != 0 {
        out_of_memory();
    }
    p.cast()
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    ensure_sink();
    ALLOCATOR.release(ptr.cast())
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    ensure_sink();
    let p = ALLOCATOR.zeroed_allocate(nmemb, size);
    if p.is_null() && nmemb != 0 && size != 0 {
        out_of_memory();
    }
    p.cast()
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    ensure_sink();
    let p = ALLOCATOR.resize(ptr.cast(), size);
    if p.is_null() && size != 0 {
        out_of_memory();
    }
    p.cast()
}

#[no_mangle]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, align: usize, size: usize) -> i32 {
    ensure_sink();
    if !align.is_power_of_two() || align % core::mem::size_of::<*mut c_void>() != 0 {
        return libc::EINVAL;
    }
    if size == 0 {
        *memptr = core::ptr::null_mut();
        return 0;
    }
    let p = ALLOCATOR.allocate_aligned(size, align);
    if p.is_null() {
        return libc::ENOMEM;
    }
    *memptr = p.cast();
    0
}

#[no_mangle]
pub unsafe extern "C" fn aligned_alloc(align: usize, size: usize) -> *mut c_void {
    ensure_sink();
    if !align.is_power_of_two() {
        set_errno(libc::EINVAL);
        return core::ptr::null_mut();
    }
    let p = ALLOCATOR.allocate_aligned(size, align);
    if p.is_null() && size != 0 {
        out_of_memory();
    }
    p.cast()
}

#[no_mangle]
pub unsafe extern "C" fn memalign(align: usize, size: usize) -> *mut c_void {
    aligned_alloc(align, size)
}
