//! Allocator configuration and the environment variables read by the diagnostic sink.

/// Names the file diagnostics are appended to. Read on every emission; stderr when unset.
pub const OUTPUT_ENV: &str = "MSM_OUTPUT";

/// [`EnvFilter`](tracing_subscriber::EnvFilter) directives for the diagnostic sink.
pub const FILTER_ENV: &str = "MSM_LOG";

/// Filter used when [`FILTER_ENV`] is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// What happens to a block once it passed the release checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Excise the record and unmap its pages.
    /// Releasing the same pointer again finds nothing and is a no-op.
    #[default]
    Unmap,
    /// Keep the pages mapped and flag the record free so later requests can reuse it.
    /// Releasing a free record again is reported and ignored.
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub release: ReleasePolicy,
}

impl Config {
    pub const DEFAULT: Config = Config {
        release: ReleasePolicy::Unmap,
    };

    pub const RETAIN: Config = Config {
        release: ReleasePolicy::Retain,
    };
}
