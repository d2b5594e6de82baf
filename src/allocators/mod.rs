//! The [`RawSecMalloc`] and [`SecMalloc`] allocators.

pub mod raw_sec_malloc;
pub mod sec_malloc;

pub use raw_sec_malloc::RawSecMalloc;
pub use sec_malloc::SecMalloc;
