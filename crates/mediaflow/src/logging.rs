//! Global tracing subscriber setup for the daemon.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;

/// Installs the global subscriber and routes `log` records into it.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global logger
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ConfigError::Logging(format!("invalid log level '{}': {}", config.level, e))
        })?,
    };

    let (pretty, json) = match config.format {
        LogFormat::Pretty => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(true))),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json);

    tracing_log::LogTracer::init()
        .map_err(|e| ConfigError::Logging(format!("failed to bridge log records: {}", e)))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(format!("failed to set global subscriber: {}", e)))?;

    Ok(())
}
