//! ThingsBoard MQTT publisher.
//!
//! Publishes through the device API for a single device, or through the
//! gateway API when device names are given. The gateway then connects
//! each device as a sub-channel and wraps telemetry in a timestamp
//! envelope, which ThingsBoard expects even without a real timestamp.
//!
//! See <https://thingsboard.io/docs/reference/mqtt-api/> and
//! <https://thingsboard.io/docs/reference/gateway-mqtt-api/>.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use thoscy_common::{DeviceMap, Document, Value, sanitize_key};

pub const DEVICE_TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
pub const GATEWAY_CONNECT_TOPIC: &str = "v1/gateway/connect";
pub const GATEWAY_DISCONNECT_TOPIC: &str = "v1/gateway/disconnect";
pub const GATEWAY_TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 100;

/// Publish failures. None of these are retried.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,

    #[error("no CONNACK within {0} s")]
    ConnectTimeout(u64),

    #[error("connection refused: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("gateway device required")]
    MissingTarget,

    #[error("gateway device not found: {0}")]
    UnknownDevice(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Selects a gateway sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    /// Device name, as shown in the ThingsBoard UI.
    Name(String),
    /// Registration index.
    Index(usize),
}

/// Broker session settings.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub host: String,
    pub port: u16,
    /// Device access token, sent as the MQTT user name.
    pub token: String,
    pub qos: QoS,
    pub connect_timeout: Duration,
    /// Send object and array values as compact JSON strings.
    pub values_stringified: bool,
}

/// Owns the MQTT session.
pub struct Publisher {
    settings: PublisherSettings,
    devices: DeviceMap,
    client: Option<AsyncClient>,
    poller: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Create a publisher. A non-empty device map selects gateway mode.
    pub fn new(settings: PublisherSettings, devices: DeviceMap) -> Self {
        Self {
            settings,
            devices,
            client: None,
            poller: None,
        }
    }

    pub fn is_gateway(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Connect to the broker and, in gateway mode, connect every device.
    ///
    /// Waits for the CONNACK before returning.
    pub async fn connect(&mut self) -> Result<(), PublishError> {
        let client_id = format!("thoscy-send-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        options.set_credentials(&self.settings.token, "");
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let limit = self.settings.connect_timeout;
        match timeout(limit, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result?,
            Err(_) => return Err(PublishError::ConnectTimeout(limit.as_secs())),
        }
        info!(
            host = %self.settings.host,
            port = self.settings.port,
            gateway = self.is_gateway(),
            "Connected to ThingsBoard"
        );

        self.poller = Some(tokio::spawn(poll_events(eventloop)));

        for entry in self.devices.iter() {
            client
                .publish(
                    GATEWAY_CONNECT_TOPIC,
                    self.settings.qos,
                    false,
                    device_payload(&entry.name),
                )
                .await?;
            debug!(device = %entry.name, "Gateway device connected");
        }

        self.client = Some(client);
        Ok(())
    }

    /// Publish a telemetry document.
    ///
    /// In gateway mode `target` selects the device and is required.
    pub async fn publish(
        &self,
        mut document: Document,
        target: Option<&DeviceTarget>,
    ) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::NotConnected)?;
        if self.settings.values_stringified {
            stringify_values(&mut document);
        }

        if self.is_gateway() {
            let name = self.resolve_target(target)?;
            let payload = gateway_payload(name, &document, chrono::Utc::now().timestamp_millis());
            client
                .publish(GATEWAY_TELEMETRY_TOPIC, self.settings.qos, false, payload.clone())
                .await?;
            debug!(device = %name, payload = %payload, "Sent");
        } else {
            let payload = document_json(&document)?;
            client
                .publish(DEVICE_TELEMETRY_TOPIC, self.settings.qos, false, payload.clone())
                .await?;
            debug!(payload = %payload, "Sent");
        }
        Ok(())
    }

    /// Disconnect gateway devices and the broker session.
    ///
    /// Safe to call when never connected.
    pub async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        for entry in self.devices.iter() {
            if let Err(e) = client
                .publish(
                    GATEWAY_DISCONNECT_TOPIC,
                    self.settings.qos,
                    false,
                    device_payload(&entry.name),
                )
                .await
            {
                warn!(device = %entry.name, error = %e, "Gateway device disconnect failed");
            }
        }
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
        }

        if let Some(mut poller) = self.poller.take() {
            if timeout(Duration::from_secs(1), &mut poller).await.is_err() {
                poller.abort();
            }
        }
        info!("Disconnected from ThingsBoard");
    }

    fn resolve_target(&self, target: Option<&DeviceTarget>) -> Result<&str, PublishError> {
        let entry = match target {
            None => return Err(PublishError::MissingTarget),
            Some(DeviceTarget::Name(name)) => self
                .devices
                .resolve_by_key(&sanitize_key(name))
                .filter(|entry| entry.name == *name),
            Some(DeviceTarget::Index(index)) => self.devices.resolve_by_slot(*index),
        };
        entry
            .map(|entry| entry.name.as_str())
            .ok_or_else(|| match target {
                Some(DeviceTarget::Name(name)) => PublishError::UnknownDevice(name.clone()),
                _ => PublishError::UnknownDevice(format!("{:?}", target)),
            })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(PublishError::Refused(code)),
                };
            }
            event => trace!(?event, "MQTT event before CONNACK"),
        }
    }
}

/// Drive the event loop so queued publishes go out.
async fn poll_events(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => trace!(?event, "MQTT event"),
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
    debug!("MQTT event loop stopped");
}

/// Serialize object and array values to compact JSON strings.
///
/// Scalars are left untouched.
pub fn stringify_values(document: &mut Document) {
    for (key, value) in document.iter_mut() {
        if value.is_object() || value.is_sequence() {
            let text = value.to_compact_json();
            debug!(key, value = %text, "Stringified value");
            *value = Value::Text(text);
        }
    }
}

fn document_json(document: &Document) -> Result<String, PublishError> {
    Ok(serde_json::to_string(document)?)
}

/// Payload for gateway connect and disconnect.
pub fn device_payload(name: &str) -> String {
    json!({ "device": name }).to_string()
}

/// Gateway telemetry payload: `{name: [{"ts": ts, "values": document}]}`.
pub fn gateway_payload(name: &str, document: &Document, ts: i64) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert(
        name.to_string(),
        json!([{ "ts": ts, "values": document }]),
    );
    serde_json::Value::Object(payload).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PublisherSettings {
        PublisherSettings {
            host: "127.0.0.1".to_string(),
            port: 1883,
            token: "token".to_string(),
            qos: QoS::AtLeastOnce,
            connect_timeout: Duration::from_secs(1),
            values_stringified: false,
        }
    }

    fn devices(names: &[&str]) -> DeviceMap {
        let mut map = DeviceMap::new();
        for name in names {
            map.register_device(name);
        }
        map
    }

    #[test]
    fn test_stringify_values() {
        let mut doc = Document::new()
            .with("n", 1)
            .with("s", "text")
            .with("list", vec![Value::Int(1), Value::Int(2)])
            .with("obj", Document::new().with("a", true));
        stringify_values(&mut doc);

        assert_eq!(doc.get("n"), Some(&Value::Int(1)));
        assert_eq!(doc.get("s"), Some(&Value::from("text")));
        assert_eq!(doc.get("list"), Some(&Value::from("[1,2]")));
        assert_eq!(doc.get("obj"), Some(&Value::from(r#"{"a":true}"#)));
    }

    #[test]
    fn test_gateway_payload() {
        let doc = Document::new().with("temperature", 21.5);
        let payload: serde_json::Value =
            serde_json::from_str(&gateway_payload("Sensor Box 1", &doc, 1234)).unwrap();
        assert_eq!(
            payload,
            json!({"Sensor Box 1": [{"ts": 1234, "values": {"temperature": 21.5}}]})
        );
        assert_eq!(device_payload("Door"), r#"{"device":"Door"}"#);
    }

    #[test]
    fn test_resolve_target() {
        let publisher = Publisher::new(settings(), devices(&["Sensor Box 1", "Door"]));
        assert!(publisher.is_gateway());

        assert_eq!(
            publisher
                .resolve_target(Some(&DeviceTarget::Name("Door".to_string())))
                .unwrap(),
            "Door"
        );
        assert_eq!(
            publisher
                .resolve_target(Some(&DeviceTarget::Index(0)))
                .unwrap(),
            "Sensor Box 1"
        );
        assert!(matches!(
            publisher.resolve_target(None),
            Err(PublishError::MissingTarget)
        ));
        assert!(matches!(
            publisher.resolve_target(Some(&DeviceTarget::Index(2))),
            Err(PublishError::UnknownDevice(_))
        ));
        assert!(matches!(
            publisher.resolve_target(Some(&DeviceTarget::Name("door".to_string()))),
            Err(PublishError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let publisher = Publisher::new(settings(), DeviceMap::new());
        assert!(!publisher.is_gateway());
        let result = publisher.publish(Document::new().with("a", 1), None).await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let mut publisher = Publisher::new(settings(), devices(&["Door"]));
        publisher.disconnect().await;
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        // Nothing listens on a freshly released port
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let mut publisher = Publisher::new(
            PublisherSettings {
                port,
                ..settings()
            },
            DeviceMap::new(),
        );
        assert!(publisher.connect().await.is_err());
        assert!(!publisher.is_connected());
    }
}
