//! Tracing subscriber initialization.

use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::LoggingConfig;

/// Initialize the global subscriber from the logging config. `RUST_LOG`
/// overrides the configured level. Safe to call once per process; embedding
/// applications that install their own subscriber should skip this.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        tracing::debug!("subscriber already installed: {e}");
    }
}
