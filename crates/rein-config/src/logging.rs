//! Tracing subscriber setup driven by the `[logging]` section.

use tracing_subscriber::EnvFilter;

use crate::schema::LoggingConfig;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .try_init()
            .is_ok(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .try_init()
            .is_ok(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .try_init()
            .is_ok(),
    }
}
