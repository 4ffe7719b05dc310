//! Logging setup.
//!
//! Log lines go to stderr so that `--json` output on stdout stays parseable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above; one line per status transition.
    #[default]
    Normal,
    /// Debug and above; upload chunks and normalization detail.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Map `-q` and repeated `-v` flags to a verbosity. Quiet wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The tracing level for this crate's own targets.
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    ///
    /// HTTP client internals stay at `warn` unless tracing everything.
    #[must_use]
    pub fn default_filter(&self) -> String {
        let ours = format!("aerognosis={},aerog={}", self.level(), self.level());
        match self {
            Self::Trace => ours,
            _ => format!("{ours},reqwest=warn,hyper=warn"),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity != Verbosity::Normal)
            .with_file(false)
            .with_line_number(false),
    );

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(0, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(1, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(2, false), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(5, false), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(3, true), Verbosity::Quiet);
    }

    #[test]
    fn test_levels() {
        assert_eq!(Verbosity::Quiet.level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.level(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.level(), Level::TRACE);
    }

    #[test]
    fn test_default_filter() {
        let normal = Verbosity::Normal.default_filter();
        assert!(normal.starts_with("aerognosis=INFO"));
        assert!(normal.contains("reqwest=warn"));

        let trace = Verbosity::Trace.default_filter();
        assert!(!trace.contains("reqwest"));

        for verbosity in [Verbosity::Quiet, Verbosity::Normal, Verbosity::Trace] {
            assert!(EnvFilter::try_new(verbosity.default_filter()).is_ok());
        }
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Verbose);
    }
}
