//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, coloured when attached to a terminal
    #[default]
    Pretty,
    /// Plain lines without ANSI escapes, for journald and log files
    Plain,
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`. Thread names are always
/// emitted so lines from the USB worker thread can be told apart.
pub fn setup_logging(default_level: &str, format: LogFormat) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    let layer = fmt::layer()
        .with_thread_names(true)
        .with_ansi(format == LogFormat::Pretty);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialised: {}", e)))?;

    Ok(())
}
