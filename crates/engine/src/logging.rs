//! Logging setup
//!
//! Stderr always; a daily-rolling file as well when a log directory is given.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,analyst_engine=debug";

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for `analyst-engine.log.*`; stderr only when `None`
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: Option<String>,
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.default_filter.as_deref().unwrap_or(DEFAULT_FILTER))
    })
}

/// Initialize logging.
///
/// Returns a guard that must be held for the lifetime of the process
/// when file output is enabled, so buffered lines get flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = build_filter(config);

    match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).ok();
            let file_appender = tracing_appender::rolling::daily(log_dir, "analyst-engine.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
                .try_init();
            if installed.is_err() {
                return None;
            }

            tracing::info!("Logging initialized, log directory: {:?}", log_dir);
            Some(guard)
        }
        None => {
            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
            if installed.is_ok() {
                tracing::debug!("Logging initialized (stderr only)");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_none());
    }
}
