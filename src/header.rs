//! Defines the [`Header`] block record and the trailing canary slot.

use core::mem::{align_of, size_of};
use core::ptr::null_mut;

use static_assertions::const_assert;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

/// Bytes reserved after every usable region for the trailing canary.
pub const CANARY_SIZE: usize = size_of::<u64>();

// The usable region starts right after the header, so the header size has to keep it aligned.
const_assert!(HEADER_SIZE % HEADER_ALIGN == 0);
const_assert!(HEADER_ALIGN >= 16);

/// Stores information about a block.
///
/// Every block lives in its own mapping laid out as
/// `[Header | size usable bytes | canary]`. The header keeps the expected canary,
/// the copy after the usable region is the one an overflow would clobber.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct Header {
    /// Usable capacity in bytes, excluding header and canary.
    pub size: usize,
    /// Next record in directory (append) order.
    pub next: *mut Header,
    pub free: bool,
    /// Start of the usable region, always `HEADER_SIZE` bytes past the header.
    pub data: *mut u8,
    pub canary: u64,
    /// Start of the mapping backing this block. Differs from the header address
    /// when the usable region had to be aligned further than [`HEADER_ALIGN`].
    pub base: *mut u8,
    /// Length of the mapping backing this block, as reported by the provider.
    pub span: usize,
}

impl Header {
    /// Writes a fresh occupied header at `block_start` and stamps the trailing canary.
    /// `base` and `span` describe the mapping the block lives in.
    ///
    /// # Safety
    /// `block_start` must point to a writable region of at least
    /// `HEADER_SIZE + size + CANARY_SIZE` bytes aligned to [`HEADER_ALIGN`].
    pub unsafe fn init(
        block_start: *mut u8,
        size: usize,
        base: *mut u8,
        span: usize,
        canary: u64,
    ) -> *mut Header {
        debug_assert_eq!(block_start as usize % HEADER_ALIGN, 0);
        let header: *mut Header = block_start.cast();
        let data = block_start.add(HEADER_SIZE);
        header.write(Header {
            size,
            next: null_mut(),
            free: false,
            data,
            canary,
            base,
            span,
        });
        (*header).stamp();
        debug_assert!((*header).is_intact());
        header
    }

    /// Address of the trailing canary.
    #[inline(always)]
    pub fn canary_slot(&self) -> *mut u8 {
        self.data.wrapping_add(self.size)
    }

    /// Copies the expected canary into the trailing slot.
    ///
    /// # Safety
    /// The header must describe a live mapping.
    #[inline]
    pub unsafe fn stamp(&self) {
        self.canary_slot().cast::<u64>().write_unaligned(self.canary);
    }

    /// Returns the value currently stored in the trailing slot.
    ///
    /// # Safety
    /// The header must describe a live mapping.
    #[inline]
    pub unsafe fn trailing_canary(&self) -> u64 {
        self.canary_slot().cast::<u64>().read_unaligned()
    }

    /// Returns whether the trailing canary still matches the expected value.
    ///
    /// # Safety
    /// The header must describe a live mapping.
    #[inline]
    pub unsafe fn is_intact(&self) -> bool {
        self.trailing_canary() == self.canary
    }

    /// Returns where a header has to go inside a mapping starting at `base` so that the
    /// usable region is aligned to `align`, or `None` on overflow.
    ///
    /// `align` must be a power of two. `base` is assumed to be [`HEADER_ALIGN`]-aligned,
    /// so the header never moves by more than `align - HEADER_ALIGN` bytes.
    #[inline]
    pub fn placement(base: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let data = (base.checked_add(HEADER_SIZE)?).checked_add(align - 1)? & !(align - 1);
        Some(data - HEADER_SIZE)
    }

    /// Returns the header owning the usable region starting at `data`.
    /// The result is only meaningful if `data` was handed out by the allocator.
    #[inline(always)]
    pub fn from_data(data: *const u8) -> *mut Header {
        data.wrapping_sub(HEADER_SIZE) as *mut Header
    }
}
