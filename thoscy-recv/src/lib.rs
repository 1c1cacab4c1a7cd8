//! OSC <- ThingsBoard websocket relay.
//!
//! Subscribes to the latest telemetry of one or more ThingsBoard devices
//! over the websocket API and forwards every update as OSC over UDP.
//!
//! # Address Format
//!
//! Single values are sent one message per key, bundled per update:
//! ```text
//! /temperature 21.5
//! /humidity 40
//! ```
//!
//! With `telemetry` enabled all pairs go into one message:
//! ```text
//! /telemetry temperature 21.5 humidity 40
//! ```
//!
//! With several devices (or `prefix` forced) the device key comes first:
//! ```text
//! /sensorbox1/temperature 21.5
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod receiver;
pub mod relay;
pub mod transport;

pub use error::{ReceiveError, Result};
