//! [`CanarySource`] trait and the two canary policies.
//!
//! A canary is an integrity classifier, not a cryptographic guarantee: it catches
//! writes running past the usable region and pointers the allocator never produced.
//! Note that a block and its canary share pages with nothing else, but there is no guard
//! page either, so an overflow that stays within the last page is only caught by the canary.

use core::mem::MaybeUninit;

/// Default value of [`SentinelCanary`].
pub const SENTINEL: u64 = 0x5EC0_C0DE_CA4A_12E5;

// Knuth's MMIX constants, full 2^64 period.
const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// Produces the canary stamped into a new block.
pub trait CanarySource {
    /// Returns the canary for the block whose header starts at `block`.
    fn next_canary(&mut self, block: *const u8) -> u64;
}

/// Every block gets the same process-wide constant.
///
/// Cheap and deterministic, but anyone able to read the binary knows the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelCanary(pub u64);

impl SentinelCanary {
    #[inline(always)]
    pub const fn new() -> Self {
        SentinelCanary(SENTINEL)
    }
}

impl Default for SentinelCanary {
    fn default() -> Self {
        Self::new()
    }
}

impl CanarySource for SentinelCanary {
    #[inline(always)]
    fn next_canary(&mut self, _block: *const u8) -> u64 {
        self.0
    }
}

/// Every block gets a fresh value from a linear congruential generator.
///
/// The generator is seeded lazily from the clock, the process id and a stack address.
/// Its output is whitened with an xorshift step and mixed with the block address, so two
/// blocks practically never share a canary. Low bits of a raw LCG are weak; do not use this
/// where unpredictability matters.
#[derive(Debug)]
pub struct LcgCanary {
    state: Option<u64>,
}

impl LcgCanary {
    /// Creates an unseeded generator, see [`with_seed`](LcgCanary::with_seed) for a fixed one.
    #[inline(always)]
    pub const fn new() -> Self {
        LcgCanary { state: None }
    }

    #[inline(always)]
    pub const fn with_seed(seed: u64) -> Self {
        LcgCanary { state: Some(seed) }
    }

    fn step(&mut self) -> u64 {
        let state = self
            .state
            .unwrap_or_else(seed)
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state = Some(state);
        state
    }
}

impl Default for LcgCanary {
    fn default() -> Self {
        Self::new()
    }
}

impl CanarySource for LcgCanary {
    fn next_canary(&mut self, block: *const u8) -> u64 {
        let mut x = self.step();
        x ^= x >> 33;
        x ^= (block as u64).rotate_left(29);
        // An all-zero canary would survive a zero-filling overflow.
        if x == 0 {
            SENTINEL
        } else {
            x
        }
    }
}

fn seed() -> u64 {
    let mut ts = MaybeUninit::<libc::timespec>::zeroed();
    // CLOCK_MONOTONIC can not fail with a valid timespec pointer.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
    let ts = unsafe { ts.assume_init() };
    let pid = unsafe { libc::getpid() } as u64;
    let stack = &ts as *const _ as u64;

    let mut x = (ts.tv_nsec as u64) ^ (ts.tv_sec as u64).rotate_left(32) ^ pid.rotate_left(17) ^ stack;
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x
}
