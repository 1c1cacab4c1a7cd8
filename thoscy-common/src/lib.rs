//! thoscy Common Library
//!
//! This crate provides shared types and utilities for the thoscy relays:
//!
//! - [`telemetry`] - Key/value document model (`Document`, `Value`)
//! - [`address`] - Slash-delimited addressed messages
//! - [`codec`] - Document <-> addressed message translation
//! - [`devices`] - Device name to address prefix mapping
//! - [`osc`] - OSC packet encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types

pub mod address;
pub mod codec;
pub mod config;
pub mod devices;
pub mod error;
pub mod osc;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use address::{AddressedMessage, TELEMETRY_COMPONENT};
pub use codec::{CodecError, to_addressed_message, to_document, to_telemetry_message};
pub use config::{
    BaseConfig, DeviceAlias, LogFormat, LoggingConfig, ThingsBoardConfig, parse_config,
};
pub use devices::{DeviceEntry, DeviceMap, sanitize_key};
pub use error::{Error, Result};
pub use telemetry::{Document, Value};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use thoscy_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
