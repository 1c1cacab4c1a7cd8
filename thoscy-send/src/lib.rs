//! OSC -> ThingsBoard MQTT relay.
//!
//! Listens for OSC messages over UDP, translates each one into a
//! telemetry document and publishes it to ThingsBoard over MQTT.
//!
//! # Address Format
//!
//! Address components become nested keys:
//! ```text
//! /temperature 21.5     -> {"temperature": 21.5}
//! /room/light 1         -> {"room": {"light": 1}}
//! ```
//!
//! `/telemetry` takes key/value pairs:
//! ```text
//! /telemetry temperature 21.5 humidity 40
//! ```
//!
//! With a gateway device token and device names, the device key comes first:
//! ```text
//! /sensorbox1/temperature 21.5
//! ```

pub mod config;
pub mod listener;
pub mod publisher;
pub mod relay;

pub use publisher::PublishError;
pub use relay::RouteError;
