//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;
use thoscy_common::LoggingConfig;

use crate::error::{BridgeError, Result};

/// Trait for relay configuration types.
///
/// Implement this trait for a relay's configuration struct to get
/// JSON5 loading and a validation hook.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use thoscy_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyRelayConfig {
///     pub logging: LoggingConfig,
///     pub host: String,
/// }
///
/// impl BridgeConfig for MyRelayConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.host.is_empty() {
///             return Err(BridgeError::validation("host required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Relays call this after all overrides are applied.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Validation is left to the caller since
    /// environment and command line overrides come afterwards.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        Ok(config)
    }

    /// Load configuration from an optional path, falling back to defaults.
    fn load_or_default(path: Option<&Path>) -> Result<Self>
    where
        Self: Default,
    {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        host: String,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.host.is_empty() {
                return Err(BridgeError::validation("host required"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = TestConfig::load_or_default(None).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("thoscy-test-{}.json5", std::process::id()));
        std::fs::write(&path, "{ host: 'tb.local', logging: { level: 'debug' } }").unwrap();

        let config = TestConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.host, "tb.local");
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
