//! The diagnostic sink.
//!
//! The allocators emit [`tracing`] events; this module decides where they end up.
//! [`init`] installs a subscriber that formats events with [`SimpleFormatter`] and writes
//! them through [`DiagnosticWriter`], which re-reads [`OUTPUT_ENV`] on every line.
//! Diagnostics are a side channel only, nothing here influences what the allocator returns.
//!
//! # Reentrancy
//! Formatting an event allocates. When the allocator is the process allocator, an event
//! emitted while the allocator lock is held would come straight back into the allocator and
//! deadlock. [`SecMalloc`](crate::SecMalloc) marks its critical section and the installed
//! subscriber drops every event raised inside it; failures are reported once the lock
//! has been released. Allocations made while a report is being written are served
//! normally but do not report themselves.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::{self, Stderr};
use std::path::PathBuf;

use tracing::{debug, error, warn, Level};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::writer::{EitherWriter, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{DEFAULT_FILTER, FILTER_ENV, OUTPUT_ENV};
use crate::error::Error;

pub use self::format::SimpleFormatter;

mod format;

/// Target of every failure report, shown as the origin of the line.
pub const TARGET: &str = "secmalloc";

thread_local! {
    static IN_CRITICAL_SECTION: Cell<bool> = const { Cell::new(false) };
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Installs the diagnostic sink as the global default subscriber.
///
/// The filter comes from [`FILTER_ENV`], falling back to [`DEFAULT_FILTER`].
/// Fails if a global subscriber is already set.
pub fn init() -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // SimpleFormatter colours the lines itself, fields always stay plain.
    let sink = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(SimpleFormatter)
        .with_writer(DiagnosticWriter)
        .with_filter(filter_fn(|_| !in_critical_section()));
    Registry::default().with(filter).with(sink).try_init()
}

/// Returns the file diagnostics should go to, if one is configured.
pub fn output_path() -> Option<PathBuf> {
    std::env::var_os(OUTPUT_ENV)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Opens the configured destination for every diagnostic line.
///
/// Appends to the file named by [`OUTPUT_ENV`] when it is set and can be opened,
/// writes to stderr otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagnosticWriter;

impl<'a> MakeWriter<'a> for DiagnosticWriter {
    type Writer = EitherWriter<File, Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        output_path()
            .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
            .map_or_else(|| EitherWriter::B(io::stderr()), EitherWriter::A)
    }
}

/// Returns whether the current thread holds an allocator lock.
#[inline]
pub fn in_critical_section() -> bool {
    IN_CRITICAL_SECTION.with(Cell::get)
}

/// Marks the current thread as inside the allocator's critical section until dropped.
pub(crate) struct CriticalSection {
    outer: bool,
}

impl CriticalSection {
    #[inline]
    pub(crate) fn enter() -> Self {
        let outer = IN_CRITICAL_SECTION.with(|flag| flag.replace(true));
        CriticalSection { outer }
    }
}

impl Drop for CriticalSection {
    #[inline]
    fn drop(&mut self) {
        IN_CRITICAL_SECTION.with(|flag| flag.set(self.outer));
    }
}

/// Emits a diagnostic for a failed `op`, unless the thread is already reporting one.
pub fn report(op: &'static str, err: &Error) {
    if REPORTING.with(|flag| flag.replace(true)) {
        return;
    }
    // event!() does not work with non-constant levels.
    match err.level() {
        Level::ERROR => error!(
            target: TARGET,
            op,
            %err,
            "Memory corruption detected, block left in place."
        ),
        Level::DEBUG => debug!(target: TARGET, op, %err),
        _ => warn!(target: TARGET, op, %err),
    }
    REPORTING.with(|flag| flag.set(false));
}

/// Reports `err` if the result is an error and passes the result on.
#[inline]
pub(crate) fn reported<T>(op: &'static str, result: Result<T, Error>) -> Result<T, Error> {
    if let Err(err) = &result {
        report(op, err);
    }
    result
}
