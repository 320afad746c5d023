//! Structured Logging
//!
//! JSON output on mainnet for log aggregation, pretty output everywhere else.
//! Every nursery action logs with the swap id as a structured field, so a
//! single swap's history is one filter away.

use thiserror::Error;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::{Config, Network};

/// Logging errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Initialize the logging system
pub fn init_logging(level: &str, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swapd={}", level)));

    let layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer().pretty().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::InitFailed(e.to_string()))
}

/// Initialize logging from the engine configuration
pub fn init_from_config(config: &Config) -> Result<(), LoggingError> {
    init_logging(&config.log_level, config.network == Network::Mainnet)
}
