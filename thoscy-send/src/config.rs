//! Send relay configuration.
//!
//! Values are layered: JSON5 file, then environment, then command line.

use std::time::Duration;

use clap::Parser;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};

use thoscy_bridge_framework::{
    BaseConfig, BridgeArgs, BridgeConfig, BridgeError, LoggingConfig, Result,
};
use thoscy_common::DeviceMap;

use crate::publisher::PublisherSettings;

/// Environment variable overriding the device access token.
pub const TOKEN_VAR: &str = "THOSCY_TOKEN";

/// Command line arguments.
#[derive(Parser, Debug, Default)]
#[command(
    name = "thoscy-send",
    version,
    about = "OSC -> ThingsBoard MQTT relay server"
)]
pub struct SendArgs {
    /// ThingsBoard server host name, ie. thingsboard.mydomain.com
    pub host: Option<String>,

    /// ThingsBoard device access token, must be a gateway device if
    /// providing additional names.
    pub token: Option<String>,

    /// ThingsBoard device name(s), requires a gateway device.
    pub names: Vec<String>,

    /// OSC receive address, default: 127.0.0.1
    #[arg(short, long)]
    pub address: Option<String>,

    /// OSC receive port, default: 7777
    #[arg(short, long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

/// Complete send relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendConfig {
    /// Shared ThingsBoard, device table and logging sections.
    #[serde(flatten)]
    pub base: BaseConfig,

    /// Send-specific settings.
    #[serde(default)]
    pub send: SendSection,
}

/// The `send` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSection {
    /// Device access token.
    #[serde(default)]
    pub token: String,

    /// OSC listen host.
    #[serde(default = "default_address")]
    pub address: String,

    /// OSC listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Gateway device aliases, looked up in the `devices` table.
    #[serde(default)]
    pub devices: Vec<String>,

    /// Raw gateway device names.
    #[serde(default)]
    pub names: Vec<String>,

    /// Send object and array values as compact JSON strings.
    #[serde(default)]
    pub values_stringified: bool,

    /// ThingsBoard MQTT port.
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    /// MQTT publish QoS: 0, 1 or 2.
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Seconds to wait for the broker to accept the connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7777
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for SendSection {
    fn default() -> Self {
        Self {
            token: String::new(),
            address: default_address(),
            port: default_port(),
            devices: Vec::new(),
            names: Vec::new(),
            values_stringified: false,
            mqtt_port: default_mqtt_port(),
            qos: default_qos(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn parse_qos(qos: u8) -> Option<QoS> {
    match qos {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

impl SendConfig {
    /// Apply environment overrides through a variable lookup.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = var(TOKEN_VAR) {
            self.send.token = token;
        }
    }

    /// Apply command line overrides. Device names are appended.
    pub fn apply_args(&mut self, args: &SendArgs) {
        if let Some(ref host) = args.host {
            self.base.thingsboard.host = host.clone();
        }
        if let Some(ref token) = args.token {
            self.send.token = token.clone();
        }
        if let Some(ref address) = args.address {
            self.send.address = address.clone();
        }
        if let Some(port) = args.port {
            self.send.port = port;
        }
        self.send.names.extend(args.names.iter().cloned());
    }

    /// Gateway device names: resolved aliases first, then raw names.
    pub fn device_names(&self) -> Vec<String> {
        let mut names = self.base.device_names(&self.send.devices);
        names.extend(self.send.names.iter().cloned());
        names
    }

    /// Gateway devices by address key. Empty for a single device.
    pub fn device_map(&self) -> DeviceMap {
        let mut devices = DeviceMap::new();
        for name in self.device_names() {
            devices.register_device(&name);
        }
        devices
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            host: self.base.thingsboard.host.clone(),
            port: self.send.mqtt_port,
            token: self.send.token.clone(),
            qos: parse_qos(self.send.qos).unwrap_or(QoS::AtLeastOnce),
            connect_timeout: Duration::from_secs(self.send.connect_timeout_secs),
            values_stringified: self.send.values_stringified,
        }
    }

    /// OSC listen address as `host:port`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.send.address, self.send.port)
    }
}

impl BridgeConfig for SendConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.base.logging
    }

    fn validate(&self) -> Result<()> {
        if self.base.thingsboard.host.is_empty() {
            return Err(BridgeError::validation("host required"));
        }
        if self.send.token.is_empty() {
            return Err(BridgeError::validation("device access token required"));
        }
        if parse_qos(self.send.qos).is_none() {
            return Err(BridgeError::validation("qos must be 0, 1 or 2"));
        }
        if self.send.connect_timeout_secs == 0 {
            return Err(BridgeError::validation("connect_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoscy_common::parse_config;

    const CONFIG: &str = r#"
    {
        thingsboard: { host: "tb.example.com" },
        devices: {
            box1: { id: "id-1", name: "Sensor Box 1" },
            box2: { id: "id-2" },
        },
        send: {
            token: "file-token",
            devices: ["box1", "box2"],
            qos: 0,
        },
    }
    "#;

    #[test]
    fn test_parse_send_config() {
        let config: SendConfig = parse_config(CONFIG).unwrap();

        assert_eq!(config.listen_address(), "127.0.0.1:7777");
        assert_eq!(config.device_names(), vec!["Sensor Box 1".to_string()]);
        let settings = config.publisher_settings();
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.qos, QoS::AtMostOnce);
        assert!(!settings.values_stringified);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_then_args_override() {
        let mut config: SendConfig = parse_config(CONFIG).unwrap();
        config.apply_env(|name| (name == TOKEN_VAR).then(|| "env-token".to_string()));
        assert_eq!(config.send.token, "env-token");

        let args = SendArgs::parse_from([
            "thoscy-send",
            "other.example.com",
            "cli-token",
            "Door",
            "Sensor-Box-1",
            "-p",
            "9999",
        ]);
        config.apply_args(&args);

        assert_eq!(config.base.thingsboard.host, "other.example.com");
        assert_eq!(config.send.token, "cli-token");
        assert_eq!(config.listen_address(), "127.0.0.1:9999");

        let devices = config.device_map();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices.resolve_by_key("door").unwrap().name, "Door");
        assert_eq!(
            devices.resolve_by_key("sensorbox1").unwrap().name,
            "Sensor Box 1"
        );
    }

    #[test]
    fn test_validation() {
        let mut config = SendConfig::default();
        assert!(config.validate().is_err());

        config.base.thingsboard.host = "tb.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(ref m)) if m == "device access token required"
        ));

        config.send.token = "token".to_string();
        config.send.qos = 3;
        assert!(config.validate().is_err());

        config.send.qos = 2;
        assert!(config.validate().is_ok());
        assert!(config.device_map().is_empty());
    }
}
