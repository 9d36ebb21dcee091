//! Log output setup

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_LEVEL_ENV: &str = "GINK_LOG_LEVEL";

/// Install a fmt subscriber filtered by `GINK_LOG_LEVEL` (default `info`).
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// Like [`init_logging`], with `fallback` used when the variable is unset.
pub fn init_logging_with(fallback: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
