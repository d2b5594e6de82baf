//! A `malloc` replacement that backs every allocation with its own anonymous mapping
//! and guards it with a canary.
//!
//! Every block is its own `mmap`, with the metadata at the front and an integrity tag right
//! behind the user data. Space efficiency is traded for a uniform, easy to check boundary
//! around every allocation: a write running past the end of a block clobbers the canary,
//! and the next release of that block refuses to hand its memory back.
//!
//! # Usage
//! ```toml
//! [dependencies]
//! secmalloc = "0.1"
//! ```
//!
//! ```
//! use secmalloc::{Config, SecMalloc};
//!
//! #[global_allocator]
//! static ALLOCATOR: SecMalloc = SecMalloc::with_mmap(Config::DEFAULT);
//!
//! fn main() {
//!     let v1: Vec<u32> = vec![1, 2, 3];
//!     println!("mmap is cool {:?}", v1);
//! }
//! ```
//!
//! Built with the `dynamic` feature the `cdylib` also exports `malloc`, `free`, `calloc` and
//! `realloc`, so it can be preloaded into any C program.
//!
//! # Allocators
//! Two allocators are exported by this crate - [`RawSecMalloc`] and [`SecMalloc`].
//! Use [`RawSecMalloc`] if you are looking for a single-threaded allocator,
//! [`SecMalloc`] is a `Mutex` wrapper over it to allow for multithreading and the one to use
//! as a global allocator. Each instance is independent: it owns its own directory,
//! space provider and canary source.
//!
//! Both offer the same four operations:
//! - `allocate(size)` returns `size` usable bytes or null.
//! - `release(ptr)` validates and retires a block. Null, unknown and corrupted pointers
//!   are reported and ignored.
//! - `zeroed_allocate(count, size)` is `allocate(count * size)` with the product checked
//!   for overflow and the memory zeroed.
//! - `resize(ptr, new_size)` moves the data into a new block, copying
//!   `min(old size, new size)` bytes. On failure the original block is left alone.
//!
//! The `try_` variants return an [`Error`] instead of reporting it. The `_aligned` variants
//! take an explicit power of two alignment, which is what the [`GlobalAlloc`](core::alloc::GlobalAlloc)
//! implementation of [`SecMalloc`] uses.
//!
//! # Mode of operation
//! ## Blocks
//! Each allocation lives in a block: one mapping holding a [header](#headers), the usable
//! bytes and an 8 byte canary, rounded up to whole pages. Blocks are never split,
//! merged or resized in place.
//!
//! ## Headers
//! At the beginning of each block there is a header holding the usable size, the link to
//! the next block, the occupancy flag, the address of the usable bytes and the
//! expected canary. The usable bytes always start right after the header and are 16 byte
//! aligned. Larger alignments are served by mapping a little extra and sliding the header
//! forward inside the mapping, so the header also records where its mapping begins.
//!
//! ## Directory
//! The directory is a singly linked list threaded through the headers, in the order blocks
//! were created. An allocation first scans it for a free block with room for the request
//! and a canary (first fit), and maps a new block if none exists.
//! Releasing looks the pointer up in the directory, checks its canary and then, depending on
//! the [`ReleasePolicy`], either excises the block and unmaps it or flags it free for reuse.
//!
//! ## Canaries
//! A [`CanarySource`] decides what gets stamped into new blocks. [`LcgCanary`] hands out a
//! fresh pseudo-random value per block, [`SentinelCanary`] a fixed constant.
//! Canaries are an integrity check, not a cryptographic one. Note that nothing sits between
//! the end of the user data and the end of its last page, so small overflows are only caught
//! by the canary, page protection only stops overruns into unmapped memory.
//!
//! ## Space providers
//! A [`SpaceProvider`] hands out zeroed page-granular regions. [`MmapProvider`] maps each one
//! anonymously; anything implementing the trait can stand in for it.
//!
//! # Diagnostics
//! Failures never abort and never panic: they produce a null pointer or a no-op and a
//! [`tracing`] event. [`diagnostics::init`] installs a subscriber printing those events to
//! stderr, or appending them to the file named by the `MSM_OUTPUT` environment variable.
//! Corruption is reported as an error, everything else as a warning.
//!
//! [`CanarySource`]: canary::CanarySource
//! [`LcgCanary`]: canary::LcgCanary
//! [`SentinelCanary`]: canary::SentinelCanary
//! [`SpaceProvider`]: providers::SpaceProvider
//! [`MmapProvider`]: providers::MmapProvider

pub use crate::allocators::RawSecMalloc;
pub use crate::allocators::SecMalloc;
pub use crate::config::{Config, ReleasePolicy};
pub use crate::error::Error;

pub mod allocators;
pub mod canary;
pub mod config;
pub mod diagnostics;
mod directory;
pub mod error;
#[cfg(feature = "dynamic")]
pub mod ffi;
mod header;
pub mod providers;
mod util;
