//! Tracing subscriber setup for binaries and tests

use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human readable events
    #[default]
    Compact,
    /// One json object per event
    Json,
}

/// Install a compact stderr subscriber
///
/// `RUST_LOG` overrides `default_filter`. Returns `false` if a global
/// subscriber was already installed, which is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    init_tracing_with_format(default_filter, LogFormat::Compact)
}

/// Install a stderr subscriber in the given format
pub fn init_tracing_with_format(default_filter: &str, format: LogFormat) -> bool {
    let filter = env_filter(default_filter);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Compact => builder.compact().try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
