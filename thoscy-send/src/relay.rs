//! OSC messages to ThingsBoard telemetry.
//!
//! ```text
//! /some/value 123             -> {"some": {"value": 123}}
//! /telemetry a 1 b 2          -> {"a": 1, "b": 2}
//! /sensorbox1/temperature 21  -> "Sensor Box 1": {"temperature": 21}   (gateway)
//! ```

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use thoscy_bridge_framework::until_shutdown;
use thoscy_common::codec::message_to_document;
use thoscy_common::{AddressedMessage, CodecError, DeviceMap, Document, to_document};

use crate::publisher::{DeviceTarget, Publisher};

/// Why a message could not be routed. The message is dropped.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    /// Malformed address or arguments.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Gateway addresses need a device key plus at least one component.
    #[error("invalid osc address: {0}")]
    InvalidAddress(String),

    /// The device key is not a known gateway device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// A translated message and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub document: Document,
    pub target: Option<DeviceTarget>,
}

/// Routes OSC messages to documents, by device key in gateway mode.
#[derive(Debug, Clone, Default)]
pub struct SendRelay {
    devices: DeviceMap,
}

impl SendRelay {
    /// A non-empty device map selects gateway mode.
    pub fn new(devices: DeviceMap) -> Self {
        Self { devices }
    }

    pub fn is_gateway(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn route(&self, message: &AddressedMessage) -> Result<Route, RouteError> {
        if !self.is_gateway() {
            return Ok(Route {
                document: message_to_document(message)?,
                target: None,
            });
        }

        // need a minimum of: /prefix/key
        let components = message.components();
        let (key, rest) = match components.split_first() {
            Some((key, rest)) if !rest.is_empty() && message.address.starts_with('/') => {
                (*key, rest)
            }
            _ => return Err(RouteError::InvalidAddress(message.address.clone())),
        };
        let entry = self
            .devices
            .resolve_by_key(key)
            .ok_or_else(|| RouteError::UnknownDevice(key.to_string()))?;

        let address = AddressedMessage::from_components(rest, Vec::new()).address;
        Ok(Route {
            document: to_document(&address, &message.args)?,
            target: Some(DeviceTarget::Name(entry.name.clone())),
        })
    }
}

/// Publish every received message until shutdown or until the listener
/// goes away, then disconnect the publisher.
pub async fn run_relay(
    relay: SendRelay,
    mut publisher: Publisher,
    mut messages: mpsc::Receiver<AddressedMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(Some(message)) = until_shutdown(&mut shutdown, messages.recv()).await {
        let route = match relay.route(&message) {
            Ok(route) => route,
            Err(e) => {
                warn!(error = %e, "Dropping message");
                continue;
            }
        };
        debug!(msg = %message, target = ?route.target, "Publishing");
        if let Err(e) = publisher.publish(route.document, route.target.as_ref()).await {
            warn!(error = %e, "Send failed");
        }
    }
    publisher.disconnect().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoscy_common::Value;

    fn gateway() -> SendRelay {
        let mut devices = DeviceMap::new();
        devices.register_device("Sensor Box 1");
        devices.register_device("Door");
        SendRelay::new(devices)
    }

    #[test]
    fn test_single_device_route() {
        let relay = SendRelay::default();
        let route = relay
            .route(&AddressedMessage::new("/foo/bar", vec![Value::Int(123)]))
            .unwrap();
        assert_eq!(route.target, None);
        assert_eq!(
            route.document,
            Document::new().with("foo", Document::new().with("bar", 123))
        );
    }

    #[test]
    fn test_gateway_route_strips_device_key() {
        let route = gateway()
            .route(&AddressedMessage::new(
                "/sensorbox1/telemetry",
                vec![Value::from("a"), Value::Int(1), Value::from("b"), Value::Int(2)],
            ))
            .unwrap();
        assert_eq!(route.target, Some(DeviceTarget::Name("Sensor Box 1".to_string())));
        assert_eq!(route.document, Document::new().with("a", 1).with("b", 2));
    }

    #[test]
    fn test_gateway_route_errors() {
        let relay = gateway();
        assert_eq!(
            relay.route(&AddressedMessage::new("/door", vec![Value::Int(1)])),
            Err(RouteError::InvalidAddress("/door".to_string()))
        );
        assert_eq!(
            relay.route(&AddressedMessage::new("/window/open", vec![Value::Int(1)])),
            Err(RouteError::UnknownDevice("window".to_string()))
        );
        assert_eq!(
            relay.route(&AddressedMessage::new("/door/open", vec![])),
            Err(RouteError::Codec(CodecError::MissingArguments(
                "/open".to_string()
            )))
        );
        assert!(matches!(
            relay.route(&AddressedMessage::new("/door//open", vec![Value::Int(1)])),
            Err(RouteError::Codec(CodecError::InvalidAddress(_)))
        ));
    }

    #[test]
    fn test_invalid_single_device_address() {
        let relay = SendRelay::default();
        assert!(matches!(
            relay.route(&AddressedMessage::new("/telemetry", vec![Value::Int(1)])),
            Err(RouteError::Codec(CodecError::TooFewPairs(_)))
        ));
    }
}
