//! Logging setup for nexq binaries.

use std::str::FromStr;

/// Environment variable that overrides the level a binary asked for.
pub const LEVEL_ENV_VAR: &str = "NEXQ_LOG";

/// Initialize the global tracing subscriber.
///
/// The level is taken from `NEXQ_LOG` when set, falling back to
/// `default_level`; a name that parses as no known level means `info`.
/// Uses `try_init` so tests and embedding binaries can call this more
/// than once.
pub fn init(default_level: &str) {
    let requested = std::env::var(LEVEL_ENV_VAR).unwrap_or_else(|_| default_level.to_string());
    let level = tracing::Level::from_str(&requested).unwrap_or(tracing::Level::INFO);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
