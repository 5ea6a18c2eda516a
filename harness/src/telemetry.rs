//! Logging setup for the `polytest` binary.
//!
//! Events go to stderr so stdout stays reserved for reports, annotations and
//! the console summary. `RUST_LOG` overrides the level chosen here.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const VERBOSE_LOG_LEVEL: &str = "debug";

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {reason}")]
    InitializationFailed { reason: String },
}

pub fn log_level(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_LOG_LEVEL
    } else {
        DEFAULT_LOG_LEVEL
    }
}

/// `RUST_LOG` when set and valid, otherwise the level implied by `verbose`.
pub fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(verbose)))
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_logging(verbose: bool) -> Result<(), TelemetryError> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(build_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        TelemetryError::InitializationFailed {
            reason: format!("Failed to set tracing subscriber: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_level_follows_verbosity() {
        assert_eq!(log_level(false), "info");
        assert_eq!(log_level(true), "debug");
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_level() {
        std::env::set_var("RUST_LOG", "warn");
        let filter = build_filter(true);
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "warn");

        assert_eq!(build_filter(true).to_string(), "debug");
    }
}
