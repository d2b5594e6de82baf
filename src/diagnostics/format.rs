//! Ad hoc formatter for readable diagnostic lines.

use std::fmt;

use nu_ansi_term::Color;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

use super::output_path;

/// Formats events as `LEVEL: origin: fields`.
///
/// Colours are only used when the line goes to the console, a file named by
/// [`OUTPUT_ENV`](crate::config::OUTPUT_ENV) gets plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleFormatter;

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let ansi = output_path().is_none();
        let fmt_level = FmtLevel::new(metadata.level(), ansi);
        write!(&mut writer, "{}: ", fmt_level)?;

        // Name the innermost span if there is one, the emitting module otherwise.
        let origin = match ctx.lookup_current() {
            Some(span) => span.name(),
            None => metadata.target(),
        };
        match ansi {
            true => write!(writer, "{}: ", Color::Purple.paint(origin))?,
            false => write!(writer, "{}: ", origin)?,
        }

        // Write fields on the event
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    pub(crate) fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

const TRACE_STR: &str = "TRACE";
const DEBUG_STR: &str = "DEBUG";
const INFO_STR: &str = " INFO";
const WARN_STR: &str = " WARN";
const ERROR_STR: &str = "ERROR";

impl<'a> fmt::Display for FmtLevel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (text, color) = match *self.level {
            Level::TRACE => (TRACE_STR, Color::Purple),
            Level::DEBUG => (DEBUG_STR, Color::Blue),
            Level::INFO => (INFO_STR, Color::Green),
            Level::WARN => (WARN_STR, Color::Yellow),
            Level::ERROR => (ERROR_STR, Color::Red),
        };
        match self.ansi {
            true => write!(f, "{}", color.paint(text)),
            false => f.write_str(text),
        }
    }
}
