//! Logging initialization.
//!
//! The library itself only emits `tracing` events. Applications embedding the
//! SDK may call [`init_logging`] once at start-up to install a subscriber
//! driven by [`LoggingConfig`]; `RUST_LOG` takes precedence over the
//! configured level when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigError, LoggingConfig};

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`ConfigError::Logging`] when the level cannot be parsed or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| ConfigError::Logging {
        message: e.to_string(),
    })
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(format!("oddsfeed_core={}", config.level)).map_err(|e| {
        ConfigError::Logging {
            message: format!("invalid log level '{}': {}", config.level, e),
        }
    })
}
