//! Telemetry updates to OSC.
//!
//! Every update becomes either one `/telemetry` message holding all
//! key/value pairs, or a bundle with one message per key:
//!
//! ```text
//! {"value1": 123, "value2": 456} -> /telemetry value1 123 value2 456
//! {"value1": 123, "value2": 456} -> [/value1 123, /value2 456]
//! ```
//!
//! With several devices, addresses are prefixed with the device key,
//! ie. `/sensorbox1/value1 123`.

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use thoscy_bridge_framework::until_shutdown;
use thoscy_common::osc::{encode_bundle, encode_message};
use thoscy_common::{
    AddressedMessage, DeviceMap, Document, Value, sanitize_key, to_addressed_message,
    to_telemetry_message,
};

use crate::client::DeviceInfo;
use crate::receiver::{LATEST_VALUES_KEY, ReceiverEvent, TelemetryUpdate, UpdateKind};

/// Keys never forwarded as telemetry.
const SKIPPED_KEYS: [&str; 3] = ["", "json", LATEST_VALUES_KEY];

/// Relay behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// Send a single `/telemetry` pair message per update.
    pub telemetry: bool,
    /// Prefix addresses with the device key.
    pub prefix: bool,
}

/// What to send for one update.
#[derive(Debug, Clone, PartialEq)]
pub enum OscOutput {
    Message(AddressedMessage),
    Bundle(Vec<AddressedMessage>),
}

impl OscOutput {
    pub fn encode(&self) -> thoscy_common::Result<Vec<u8>> {
        match self {
            OscOutput::Message(message) => encode_message(message),
            OscOutput::Bundle(messages) => encode_bundle(messages),
        }
    }
}

/// Translates receiver events into OSC output.
#[derive(Debug, Default)]
pub struct RecvRelay {
    options: RelayOptions,
    devices: DeviceMap,
}

impl RecvRelay {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            options,
            devices: DeviceMap::new(),
        }
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    /// Register device names for the address prefix.
    ///
    /// Devices are sent again after every reconnect. Keys registered by an
    /// earlier batch are skipped, so a key collision is only reported once.
    pub fn handle_devices(&mut self, devices: &[DeviceInfo]) {
        if !self.options.prefix {
            return;
        }
        let registered = self.devices.len();
        for device in devices {
            let known = self
                .devices
                .resolve_by_key(&sanitize_key(&device.name))
                .is_some_and(|entry| entry.slot < registered);
            if !known {
                self.devices.register_device(&device.name);
            }
        }
        for entry in self.devices.iter() {
            info!(key = %entry.key, name = %entry.name, "/{} <- {}", entry.key, entry.name);
        }
    }

    /// Translate an update, `None` when there is nothing to send.
    pub fn translate(&self, update: &TelemetryUpdate) -> Option<OscOutput> {
        let data = match update.kind() {
            UpdateKind::Data(data) => data,
            UpdateKind::Dropped => {
                warn!("Telemetry error: data empty, did connection fail?");
                return None;
            }
            UpdateKind::Error { code, message } => {
                warn!(code, error_msg = message, "Telemetry error");
                return None;
            }
        };

        let prefix = if self.options.prefix {
            match self.devices.resolve_by_slot(update.subscription_id) {
                Some(entry) => Some(entry.key.as_str()),
                None => {
                    warn!(
                        subscription_id = update.subscription_id,
                        keys = ?data.keys().collect::<Vec<_>>(),
                        "Received update from unknown device"
                    );
                    return None;
                }
            }
        } else {
            None
        };
        let prefixed = |message: AddressedMessage| match prefix {
            Some(key) => message.with_prefix(key),
            None => message,
        };

        let latest = latest_values(data);
        if latest.is_empty() {
            debug!("Update without telemetry values");
            return None;
        }

        if self.options.telemetry {
            match to_telemetry_message(&latest) {
                Ok(message) => Some(OscOutput::Message(prefixed(message))),
                Err(e) => {
                    warn!(error = %e, "Dropping update");
                    None
                }
            }
        } else {
            let messages: Vec<_> = latest
                .into_iter()
                .filter_map(|(key, value)| {
                    match to_addressed_message(&Document::new().with(key.clone(), value)) {
                        Ok(message) => Some(prefixed(message)),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Dropping value");
                            None
                        }
                    }
                })
                .collect();
            (!messages.is_empty()).then_some(OscOutput::Bundle(messages))
        }
    }
}

/// Latest value of every key, numerically coerced.
///
/// Values arrive as `[[timestamp, value]]`; anything else is taken as is.
pub fn latest_values(data: &Document) -> Document {
    data.iter()
        .filter(|(key, _)| !SKIPPED_KEYS.contains(key))
        .map(|(key, value)| (key, latest_value(value).coerce_numeric()))
        .collect()
}

fn latest_value(value: &Value) -> Value {
    value
        .as_sequence()
        .and_then(|samples| samples.first())
        .and_then(Value::as_sequence)
        .and_then(|pair| pair.get(1))
        .unwrap_or(value)
        .clone()
}

/// Sends encoded OSC packets to one destination.
pub struct OscSender {
    socket: UdpSocket,
    target: String,
}

impl OscSender {
    /// Bind an ephemeral local socket for sending to `target` (`host:port`).
    pub async fn bind(target: impl Into<String>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: target.into(),
        })
    }

    pub async fn send(&self, output: &OscOutput) -> thoscy_common::Result<()> {
        let packet = output.encode()?;
        self.socket.send_to(&packet, &self.target).await?;
        Ok(())
    }
}

/// Drive the relay from receiver events until shutdown or until the
/// receiver goes away.
pub async fn run_relay(
    mut relay: RecvRelay,
    mut events: mpsc::Receiver<ReceiverEvent>,
    sender: OscSender,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(Some(event)) = until_shutdown(&mut shutdown, events.recv()).await {
        match event {
            ReceiverEvent::Devices(devices) => {
                info!(count = devices.len(), "Received device info");
                relay.handle_devices(&devices);
            }
            ReceiverEvent::Update(update) => {
                let Some(output) = relay.translate(&update) else {
                    continue;
                };
                debug!(?output, "Sending");
                if let Err(e) = sender.send(&output).await {
                    warn!(error = %e, "OSC send failed");
                }
            }
        }
    }
    debug!("Relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> TelemetryUpdate {
        serde_json::from_str(json).unwrap()
    }

    fn device(id: &str, name: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    const TWO_KEYS: &str = r#"{"subscriptionId": 0, "errorCode": 0,
        "data": {"temperature": [[1, "21.5"]], "status": [[1, "ok"]], "json": [[1, "{}"]]}}"#;

    #[test]
    fn test_latest_values() {
        let data: Document = serde_json::from_str(
            r#"{"a": [[1, "2"]], "b": "raw", "": [[1, 1]], "json": [[1, 1]]}"#,
        )
        .unwrap();
        let latest = latest_values(&data);
        assert_eq!(latest, Document::new().with("a", 2.0).with("b", "raw"));
    }

    #[test]
    fn test_single_messages_bundle() {
        let relay = RecvRelay::new(RelayOptions::default());
        let output = relay.translate(&update(TWO_KEYS)).unwrap();
        assert_eq!(
            output,
            OscOutput::Bundle(vec![
                AddressedMessage::new("/temperature", vec![Value::Float(21.5)]),
                AddressedMessage::new("/status", vec![Value::from("ok")]),
            ])
        );
    }

    #[test]
    fn test_telemetry_message() {
        let relay = RecvRelay::new(RelayOptions {
            telemetry: true,
            prefix: false,
        });
        let output = relay.translate(&update(TWO_KEYS)).unwrap();
        assert_eq!(
            output,
            OscOutput::Message(AddressedMessage::new(
                "/telemetry",
                vec![
                    Value::from("temperature"),
                    Value::Float(21.5),
                    Value::from("status"),
                    Value::from("ok"),
                ]
            ))
        );
    }

    #[test]
    fn test_structured_value_expands_address() {
        let relay = RecvRelay::new(RelayOptions::default());
        let frame = update(r#"{"subscriptionId": 0, "data": {"pos": [[1, {"x": 1}]]}}"#);
        assert_eq!(
            relay.translate(&frame),
            Some(OscOutput::Bundle(vec![AddressedMessage::new(
                "/pos/x",
                vec![Value::Float(1.0)]
            )]))
        );
    }

    #[test]
    fn test_prefix_by_slot() {
        let mut relay = RecvRelay::new(RelayOptions {
            telemetry: true,
            prefix: true,
        });
        relay.handle_devices(&[device("a", "Sensor Box 1"), device("b", "Door")]);
        relay.handle_devices(&[device("a", "Sensor Box 1"), device("b", "Door")]);
        assert_eq!(relay.devices().len(), 2);

        let frame = update(r#"{"subscriptionId": 1, "data": {"open": [[1, "1"]]}}"#);
        let Some(OscOutput::Message(message)) = relay.translate(&frame) else {
            panic!("expected message");
        };
        assert_eq!(message.address, "/door/telemetry");

        let unknown = update(r#"{"subscriptionId": 5, "data": {"open": [[1, "1"]]}}"#);
        assert_eq!(relay.translate(&unknown), None);
    }

    #[test]
    fn test_colliding_keys_kept_across_reconnects() {
        let mut relay = RecvRelay::new(RelayOptions {
            telemetry: false,
            prefix: true,
        });
        let batch = [device("a", "Door 1"), device("b", "door_1")];
        relay.handle_devices(&batch);
        relay.handle_devices(&batch);
        relay.handle_devices(&[device("c", "Window")]);

        assert_eq!(relay.devices().len(), 2);
        assert_eq!(relay.devices().resolve_by_key("door1").unwrap().name, "Door 1");
        assert_eq!(relay.devices().resolve_by_slot(1).unwrap().name, "Window");
    }

    #[test]
    fn test_devices_ignored_without_prefix() {
        let mut relay = RecvRelay::new(RelayOptions::default());
        relay.handle_devices(&[device("a", "Sensor Box 1")]);
        assert!(relay.devices().is_empty());
    }

    #[test]
    fn test_dropped_and_error_send_nothing() {
        let relay = RecvRelay::new(RelayOptions::default());
        assert_eq!(
            relay.translate(&update(r#"{"subscriptionId": 0, "errorCode": 0, "data": null}"#)),
            None
        );
        assert_eq!(
            relay.translate(&update(
                r#"{"subscriptionId": 0, "errorCode": 3, "errorMsg": "nope", "data": null}"#
            )),
            None
        );
    }

    #[tokio::test]
    async fn test_sender_delivers_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let sender = OscSender::bind(target).await.unwrap();

        let output = OscOutput::Message(AddressedMessage::new("/a", vec![Value::Int(1)]));
        sender.send(&output).await.unwrap();

        let mut buf = [0u8; 1024];
        let len = receiver.recv(&mut buf).await.unwrap();
        let decoded = thoscy_common::osc::decode_datagram(&buf[..len]).unwrap();
        assert_eq!(decoded, vec![AddressedMessage::new("/a", vec![Value::Int(1)])]);
    }
}
