//! The [`Error`] type returned by the fallible allocator operations.

use core::fmt;

use tracing::Level;

/// Everything that can make an allocator operation fail.
///
/// None of these is fatal: the public operations turn every error into a null
/// pointer or a no-op and hand it to the [diagnostic sink](crate::diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A zero-sized request or one too large to describe an object.
    InvalidSize { size: usize },
    /// `count * size` does not fit in a `usize`.
    SizeOverflow { count: usize, size: usize },
    /// The space provider refused to map memory.
    OutOfMemory { size: usize },
    /// Release of a null pointer.
    NullPointer,
    /// A pointer that does not belong to any live block.
    UnknownPointer { addr: usize },
    /// A pointer whose block was already released and kept for reuse.
    DoubleRelease { addr: usize },
    /// The trailing canary of a block no longer matches its header.
    IntegrityViolation { addr: usize, expected: u64, found: u64 },
    /// An alignment the allocator can not honour.
    UnsupportedAlignment { align: usize },
}

impl Error {
    /// Severity the diagnostic sink reports this error with.
    pub fn level(&self) -> Level {
        match self {
            Error::IntegrityViolation { .. } => Level::ERROR,
            Error::NullPointer => Level::DEBUG,
            _ => Level::WARN,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidSize { size } => write!(f, "invalid allocation size {size}"),
            Error::SizeOverflow { count, size } => {
                write!(f, "{count} elements of {size} bytes overflow usize")
            }
            Error::OutOfMemory { size } => write!(f, "could not map memory for {size} bytes"),
            Error::NullPointer => write!(f, "null pointer"),
            Error::UnknownPointer { addr } => write!(f, "pointer {addr:#x} was not allocated here"),
            Error::DoubleRelease { addr } => write!(f, "pointer {addr:#x} was already released"),
            Error::IntegrityViolation {
                addr,
                expected,
                found,
            } => write!(
                f,
                "integrity violation at {addr:#x}: canary {found:#018x}, expected {expected:#018x}"
            ),
            Error::UnsupportedAlignment { align } => write!(f, "unsupported alignment {align}"),
        }
    }
}

impl std::error::Error for Error {}
