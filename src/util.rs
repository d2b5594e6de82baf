//! Utility functions.

use core::ptr::{null_mut, NonNull};

use crate::header::{CANARY_SIZE, HEADER_ALIGN, HEADER_SIZE};

/// Returns the smallest integer `z` such that `z ≥ x` and `z = y.k` for some integer `k`.
/// or `None` if that integer can not be contained in a `usize`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn find_divisible(x: usize, y: usize) -> Option<usize> {
    if x % y == 0 {
        Some(x)
    } else {
        ((x / y) * y).checked_add(y)
    }
}

/// Returns the number of bytes a block with `size` usable bytes aligned to `align` occupies
/// before page rounding, or `None` if the request can not describe a valid object.
///
/// Alignments above [`HEADER_ALIGN`] reserve room for sliding the header forward.
#[inline]
pub(crate) fn block_footprint(size: usize, align: usize) -> Option<usize> {
    let slack = align.saturating_sub(HEADER_ALIGN);
    // Size of objects should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    let total = size.checked_add(HEADER_SIZE + CANARY_SIZE)?.checked_add(slack)?;
    (total <= isize::MAX as usize).then_some(total)
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}
