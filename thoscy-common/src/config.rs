use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// ThingsBoard server settings shared by both relay directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingsBoardConfig {
    /// Server host name, ie. "thingsboard.mydomain.com".
    #[serde(default)]
    pub host: String,

    /// Use TLS (https/wss) for the REST and websocket APIs.
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ThingsBoardConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            tls: true,
        }
    }
}

impl ThingsBoardConfig {
    /// Base URL of the REST API.
    pub fn http_base(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }

    /// Base URL of the websocket API.
    pub fn ws_base(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}", scheme, self.host)
    }
}

/// A device entry in the shared device table of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAlias {
    /// ThingsBoard device id, needed to subscribe to its telemetry.
    #[serde(default)]
    pub id: Option<String>,

    /// ThingsBoard device name, needed to publish through a gateway.
    #[serde(default)]
    pub name: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Base configuration shared by both relays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseConfig {
    /// ThingsBoard server settings.
    #[serde(default)]
    pub thingsboard: ThingsBoardConfig,

    /// Known devices by alias.
    #[serde(default)]
    pub devices: HashMap<String, DeviceAlias>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BaseConfig {
    /// Look up device ids for a list of aliases.
    ///
    /// Unknown aliases and aliases without an id are logged and skipped.
    pub fn device_ids(&self, aliases: &[String]) -> Vec<String> {
        self.resolve_aliases(aliases, "id", |device| device.id.as_deref())
    }

    /// Look up device names for a list of aliases.
    ///
    /// Unknown aliases and aliases without a name are logged and skipped.
    pub fn device_names(&self, aliases: &[String]) -> Vec<String> {
        self.resolve_aliases(aliases, "name", |device| device.name.as_deref())
    }

    fn resolve_aliases<F>(&self, aliases: &[String], field: &str, get: F) -> Vec<String>
    where
        F: Fn(&DeviceAlias) -> Option<&str>,
    {
        aliases
            .iter()
            .filter_map(|alias| {
                let Some(device) = self.devices.get(alias) else {
                    tracing::warn!(alias = %alias, "Ignoring unknown device");
                    return None;
                };
                match get(device).filter(|v| !v.is_empty()) {
                    Some(value) => Some(value.to_string()),
                    None => {
                        tracing::warn!(alias = %alias, field, "Ignoring device without field");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_config() {
        let json5 = r#"
        {
            thingsboard: {
                host: "tb.example.com",
                tls: false,
            },
            devices: {
                box1: { id: "1234-abcd", name: "Sensor Box 1" },
                box2: { name: "Sensor Box 2" },
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: BaseConfig = parse_config(json5).unwrap();

        assert_eq!(config.thingsboard.host, "tb.example.com");
        assert_eq!(config.thingsboard.http_base(), "http://tb.example.com");
        assert_eq!(config.thingsboard.ws_base(), "ws://tb.example.com");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_config() {
        let config: BaseConfig = parse_config("{}").unwrap();

        assert!(config.thingsboard.host.is_empty());
        assert!(config.thingsboard.tls);
        assert!(config.devices.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"{ logging: { level: "debug", format: "json" } }"#;
        let config: BaseConfig = parse_config(json5).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_alias_resolution_skips_missing() {
        let json5 = r#"
        {
            devices: {
                box1: { id: "id-1", name: "Box 1" },
                box2: { name: "Box 2" },
            },
        }
        "#;
        let config: BaseConfig = parse_config(json5).unwrap();
        let aliases = vec!["box1".to_string(), "box2".to_string(), "nope".to_string()];

        assert_eq!(config.device_ids(&aliases), vec!["id-1".to_string()]);
        assert_eq!(
            config.device_names(&aliases),
            vec!["Box 1".to_string(), "Box 2".to_string()]
        );
    }
}
