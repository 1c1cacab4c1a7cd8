//! Receive relay configuration.
//!
//! Values are layered: JSON5 file, then environment, then command line.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use thoscy_bridge_framework::{
    BaseConfig, BridgeArgs, BridgeConfig, BridgeError, LoggingConfig, Result,
};

use crate::client::Credentials;
use crate::receiver::ReceiverSettings;

/// Environment variable overriding the ThingsBoard user name.
pub const USER_VAR: &str = "THOSCY_USER";

/// Environment variable overriding the ThingsBoard user password.
pub const PASSWORD_VAR: &str = "THOSCY_PASS";

/// Command line arguments.
#[derive(Parser, Debug, Default)]
#[command(
    name = "thoscy-recv",
    version,
    about = "OSC <- ThingsBoard websocket relay server"
)]
pub struct RecvArgs {
    /// ThingsBoard server host name, ie. thingsboard.mydomain.com
    pub host: Option<String>,

    /// ThingsBoard device id(s), appended to the configured ones.
    pub ids: Vec<String>,

    /// ThingsBoard user name.
    #[arg(long)]
    pub user: Option<String>,

    /// ThingsBoard user password.
    #[arg(long)]
    pub password: Option<String>,

    /// OSC send address, default: 127.0.0.1
    #[arg(short, long)]
    pub address: Option<String>,

    /// OSC send port, default: 7788
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Send all key/value pairs in a single /telemetry message.
    #[arg(short, long)]
    pub telemetry: bool,

    /// Force the OSC address device name prefix for a single device.
    #[arg(long)]
    pub prefix: bool,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

/// Complete receive relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecvConfig {
    /// Shared ThingsBoard, device table and logging sections.
    #[serde(flatten)]
    pub base: BaseConfig,

    /// Receive-specific settings.
    #[serde(default)]
    pub recv: RecvSection,
}

/// The `recv` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecvSection {
    /// ThingsBoard user name.
    #[serde(default)]
    pub user: String,

    /// ThingsBoard user password.
    #[serde(default)]
    pub password: String,

    /// OSC destination host.
    #[serde(default = "default_address")]
    pub address: String,

    /// OSC destination port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device aliases to subscribe to, looked up in the `devices` table.
    #[serde(default)]
    pub devices: Vec<String>,

    /// Raw device ids to subscribe to.
    #[serde(default)]
    pub ids: Vec<String>,

    /// Send all key/value pairs in a single /telemetry message.
    #[serde(default)]
    pub telemetry: bool,

    /// Force the device name prefix even for a single device.
    #[serde(default)]
    pub prefix: bool,

    /// Parse complex values that ThingsBoard stores as strings.
    #[serde(default = "default_true")]
    pub values_stringified: bool,

    /// Seconds to wait for a frame before sending a keepalive ping.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,

    /// Seconds to wait for the keepalive pong.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Seconds between reconnection attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7788
}

fn default_true() -> bool {
    true
}

fn default_reply_timeout_secs() -> u64 {
    10
}

fn default_ping_timeout_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for RecvSection {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            address: default_address(),
            port: default_port(),
            devices: Vec::new(),
            ids: Vec::new(),
            telemetry: false,
            prefix: false,
            values_stringified: default_true(),
            reply_timeout_secs: default_reply_timeout_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl RecvConfig {
    /// Apply environment overrides through a variable lookup.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = var(USER_VAR) {
            self.recv.user = user;
        }
        if let Some(password) = var(PASSWORD_VAR) {
            self.recv.password = password;
        }
    }

    /// Apply command line overrides. Device ids are appended.
    pub fn apply_args(&mut self, args: &RecvArgs) {
        if let Some(ref host) = args.host {
            self.base.thingsboard.host = host.clone();
        }
        if let Some(ref user) = args.user {
            self.recv.user = user.clone();
        }
        if let Some(ref password) = args.password {
            self.recv.password = password.clone();
        }
        if let Some(ref address) = args.address {
            self.recv.address = address.clone();
        }
        if let Some(port) = args.port {
            self.recv.port = port;
        }
        self.recv.telemetry |= args.telemetry;
        self.recv.prefix |= args.prefix;
        self.recv.ids.extend(args.ids.iter().cloned());
    }

    /// Device ids to subscribe to: resolved aliases first, then raw ids.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids = self.base.device_ids(&self.recv.devices);
        ids.extend(self.recv.ids.iter().cloned());
        ids
    }

    /// Whether OSC addresses get a device name prefix.
    pub fn prefix_active(&self) -> bool {
        self.recv.prefix || self.device_ids().len() > 1
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.recv.user.clone(),
            password: self.recv.password.clone(),
        }
    }

    pub fn receiver_settings(&self) -> ReceiverSettings {
        ReceiverSettings {
            reply_timeout: Duration::from_secs(self.recv.reply_timeout_secs),
            ping_timeout: Duration::from_secs(self.recv.ping_timeout_secs),
            reconnect_delay: Duration::from_secs(self.recv.reconnect_delay_secs),
            values_stringified: self.recv.values_stringified,
            fetch_devices: true,
        }
    }

    /// OSC destination as `host:port`.
    pub fn osc_target(&self) -> String {
        format!("{}:{}", self.recv.address, self.recv.port)
    }
}

impl BridgeConfig for RecvConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.base.logging
    }

    fn validate(&self) -> Result<()> {
        if self.base.thingsboard.host.is_empty() {
            return Err(BridgeError::validation("host required"));
        }
        if self.device_ids().is_empty() {
            return Err(BridgeError::validation("device id(s) required"));
        }
        if self.recv.user.is_empty() || self.recv.password.is_empty() {
            return Err(BridgeError::validation("user & password required"));
        }
        if self.recv.reply_timeout_secs == 0 || self.recv.ping_timeout_secs == 0 {
            return Err(BridgeError::validation("timeouts must be > 0"));
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
            box2: { name: "Sensor Box 2" },
        },
        recv: {
            user: "file-user",
            password: "file-pass",
            port: 9000,
            devices: ["box1", "box2"],
        },
    }
    "#;

    #[test]
    fn test_parse_recv_config() {
        let config: RecvConfig = parse_config(CONFIG).unwrap();

        assert_eq!(config.base.thingsboard.host, "tb.example.com");
        assert_eq!(config.recv.address, "127.0.0.1");
        assert_eq!(config.recv.port, 9000);
        assert!(config.recv.values_stringified);
        assert_eq!(config.device_ids(), vec!["id-1".to_string()]);
        assert_eq!(config.osc_target(), "127.0.0.1:9000");
        assert!(!config.prefix_active());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = RecvConfig::default();
        let settings = config.receiver_settings();

        assert_eq!(config.recv.port, 7788);
        assert_eq!(settings.reply_timeout, Duration::from_secs(10));
        assert_eq!(settings.ping_timeout, Duration::from_secs(5));
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert!(settings.values_stringified);
    }

    #[test]
    fn test_env_then_args_override() {
        let mut config: RecvConfig = parse_config(CONFIG).unwrap();

        config.apply_env(|name| match name {
            USER_VAR => Some("env-user".to_string()),
            PASSWORD_VAR => Some("env-pass".to_string()),
            _ => None,
        });
        assert_eq!(config.recv.user, "env-user");
        assert_eq!(config.recv.password, "env-pass");

        let args = RecvArgs::parse_from([
            "thoscy-recv",
            "other.example.com",
            "id-2",
            "--user",
            "cli-user",
            "-t",
            "-p",
            "7000",
        ]);
        config.apply_args(&args);

        assert_eq!(config.base.thingsboard.host, "other.example.com");
        assert_eq!(config.recv.user, "cli-user");
        assert_eq!(config.recv.password, "env-pass");
        assert_eq!(config.recv.port, 7000);
        assert!(config.recv.telemetry);
        assert_eq!(
            config.device_ids(),
            vec!["id-1".to_string(), "id-2".to_string()]
        );
        assert!(config.prefix_active());
    }

    #[test]
    fn test_validation() {
        let mut config = RecvConfig::default();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(ref m)) if m == "host required"
        ));

        config.base.thingsboard.host = "tb.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(ref m)) if m == "device id(s) required"
        ));

        config.recv.ids.push("id-1".to_string());
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(ref m)) if m == "user & password required"
        ));

        config.recv.user = "user".to_string();
        config.recv.password = "pass".to_string();
        assert!(config.validate().is_ok());
    }
}
