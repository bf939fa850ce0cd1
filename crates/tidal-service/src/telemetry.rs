//! Tracing initialization.
//!
//! ```no_run
//! use tidal_core::TidalConfig;
//! use tidal_service::telemetry;
//!
//! let config = TidalConfig::load().expect("invalid configuration");
//! telemetry::init_tracing(&config.logging).expect("Failed to initialize tracing");
//! ```

use tidal_core::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry};

/// Installs the global subscriber: an `EnvFilter` (taken from `RUST_LOG`
/// when set, else `config.level`) and a pretty or JSON formatting layer.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let registry = Registry::default().with(env_filter);
    if config.format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(true),
            )
            .try_init()
    }
}

fn default_directives(level: &str) -> String {
    format!("{level},tidal=debug")
}
