//! Connection manager for the ThingsBoard telemetry websocket.
//!
//! Each session walks through:
//!
//! ```text
//! Disconnected -> Authenticating -> Subscribing -> [FetchingMetadata] -> Streaming
//! ```
//!
//! and any failure drops the whole session back to `Disconnected`. After a
//! fixed delay the next session starts from the token exchange again.
//! There is no retry limit, the receiver runs until shutdown is requested.
//!
//! See <https://thingsboard.io/docs/user-guide/telemetry/> for the websocket API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use thoscy_bridge_framework::until_shutdown;
use thoscy_common::{Document, Value};

use crate::client::{DeviceInfo, TokenPair};
use crate::error::{ReceiveError, Result};

/// Key holding per-key update timestamps rather than telemetry.
pub const LATEST_VALUES_KEY: &str = "latestValues";

/// An open duplex channel carrying JSON text frames.
#[async_trait]
pub trait DuplexChannel: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next text frame, `Ok(None)` once the channel is closed.
    async fn next_frame(&mut self) -> Result<Option<String>>;

    /// Send a zero-payload ping and wait for the answer.
    ///
    /// Text frames arriving meanwhile must not be lost.
    async fn ping(&mut self) -> Result<()>;
}

/// Everything the connection manager needs from the server.
#[async_trait]
pub trait Transport: Send + Sync {
    type Channel: DuplexChannel;

    /// Exchange the configured credentials for session tokens.
    async fn fetch_tokens(&self) -> Result<TokenPair>;

    /// Open the telemetry channel with a session token.
    async fn open(&self, token: &str) -> Result<Self::Channel>;

    /// Look up device metadata for the given device ids.
    async fn fetch_devices(&self, token: &str, ids: &[String]) -> Result<Vec<DeviceInfo>>;
}

/// Where a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Subscribing,
    FetchingMetadata,
    Streaming,
}

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    /// How long to wait for a frame before probing with a ping.
    pub reply_timeout: Duration,
    /// How long to wait for the pong.
    pub ping_timeout: Duration,
    /// Fixed delay between a failed session and the next attempt.
    pub reconnect_delay: Duration,
    /// Parse bracket-delimited string values back into JSON structures.
    pub values_stringified: bool,
    /// Look up device metadata after subscribing.
    pub fetch_devices: bool,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            values_stringified: true,
            fetch_devices: true,
        }
    }
}

/// An inbound telemetry frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    /// Latest values per key, each as `[[timestamp, value]]`.
    #[serde(default)]
    pub data: Option<Document>,
    /// Echo of the `cmdId` of the subscription.
    #[serde(default)]
    pub subscription_id: usize,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
}

/// What an update carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateKind<'a> {
    /// Telemetry values.
    Data(&'a Document),
    /// No data and no error code: the upstream connection dropped or is
    /// not initialized yet. Not a telemetry gap.
    Dropped,
    /// No data and an explicit error from the server.
    Error { code: i32, message: &'a str },
}

impl TelemetryUpdate {
    pub fn kind(&self) -> UpdateKind<'_> {
        match (&self.data, self.error_code) {
            (Some(data), _) => UpdateKind::Data(data),
            (None, 0) => UpdateKind::Dropped,
            (None, code) => UpdateKind::Error {
                code,
                message: self.error_msg.as_deref().unwrap_or_default(),
            },
        }
    }
}

/// Events delivered to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    /// Device metadata, in subscription order. Sent once per session.
    Devices(Vec<DeviceInfo>),
    /// A telemetry frame.
    Update(TelemetryUpdate),
}

/// Build the subscription command for a list of device ids.
///
/// Each subscription's `cmdId` is its index, which the server echoes back
/// as `subscriptionId`.
pub fn subscription_command(device_ids: &[String]) -> String {
    let commands: Vec<_> = device_ids
        .iter()
        .enumerate()
        .map(|(slot, id)| {
            json!({
                "entityType": "DEVICE",
                "entityId": id,
                "scope": "LATEST_TELEMETRY",
                "cmdId": slot,
            })
        })
        .collect();
    json!({
        "tsSubCmds": commands,
        "historyCmds": [],
        "attrSubCmds": [],
    })
    .to_string()
}

/// Parse stringified JSON objects and arrays back into structures.
///
/// Walks every key except [`LATEST_VALUES_KEY`]. A text value starting and
/// ending with matching `{}` or `[]` is parsed as JSON. Text that only
/// looks like JSON, such as `"{not json}"`, is kept as it is.
pub fn parse_stringified_values(data: &mut Document) {
    for (key, value) in data.iter_mut() {
        if key == LATEST_VALUES_KEY {
            continue;
        }
        parse_stringified(key, value);
    }
}

fn parse_stringified(key: &str, value: &mut Value) {
    let parsed = match value {
        Value::Text(text) if looks_structured(text) => {
            match serde_json::from_str::<Value>(text) {
                Ok(parsed) => {
                    debug!(key, value = %text, "Parsed stringified value");
                    Some(parsed)
                }
                Err(e) => {
                    debug!(key, error = %e, "Parse failed, keeping text");
                    None
                }
            }
        }
        Value::Sequence(items) => {
            items.iter_mut().for_each(|item| parse_stringified(key, item));
            None
        }
        Value::Object(doc) => {
            doc.iter_mut()
                .for_each(|(inner, item)| parse_stringified(inner, item));
            None
        }
        _ => None,
    };
    if let Some(parsed) = parsed {
        *value = parsed;
    }
}

fn looks_structured(text: &str) -> bool {
    (text.starts_with('{') && text.ends_with('}'))
        || (text.starts_with('[') && text.ends_with(']'))
}

/// Reorder device records to match the subscription order.
///
/// The device lookup does not keep request order. Ids without a record
/// are skipped.
pub fn order_devices(device_ids: &[String], mut devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    device_ids
        .iter()
        .filter_map(|id| match devices.iter().position(|d| d.id == *id) {
            Some(index) => Some(devices.swap_remove(index)),
            None => {
                warn!(id = %id, "No device info returned");
                None
            }
        })
        .collect()
}

/// Why a session ended without an error.
enum Stop {
    Shutdown,
    SinkClosed,
}

/// Await a future, ending the session when shutdown wins the race.
macro_rules! interruptible {
    ($shutdown:expr, $future:expr) => {
        match until_shutdown($shutdown, $future).await {
            Some(output) => output,
            None => return Ok(Stop::Shutdown),
        }
    };
}

/// Owns the authenticated telemetry session and restarts it on failure.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    device_ids: Vec<String>,
    settings: ReceiverSettings,
    sink: mpsc::Sender<ReceiverEvent>,
    state: watch::Sender<SessionState>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        device_ids: Vec<String>,
        settings: ReceiverSettings,
        sink: mpsc::Sender<ReceiverEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            device_ids,
            settings,
            sink,
            state,
        }
    }

    /// Watch the session state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run sessions until shutdown is requested or the sink is closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.settings.reconnect_delay;
        loop {
            debug!("Creating new connection");
            let result = self.run_session(&mut shutdown).await;
            self.set_state(SessionState::Disconnected);

            match result {
                Ok(Stop::Shutdown) => break,
                Ok(Stop::SinkClosed) => {
                    info!("Telemetry sink closed, stopping receiver");
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_secs = delay.as_secs(),
                        "Connection failed, retrying"
                    );
                }
            }

            if until_shutdown(&mut shutdown, sleep(delay)).await.is_none() {
                break;
            }
        }
        debug!("Receiver stopped");
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Stop> {
        self.set_state(SessionState::Authenticating);
        let tokens = interruptible!(shutdown, self.transport.fetch_tokens())?;

        self.set_state(SessionState::Subscribing);
        let mut channel = interruptible!(shutdown, self.transport.open(&tokens.token))?;
        let command = subscription_command(&self.device_ids);
        debug!(command = %command, "Sending subscription");
        interruptible!(shutdown, channel.send_text(command))?;
        info!(devices = self.device_ids.len(), "Subscribed to telemetry");

        if self.settings.fetch_devices {
            self.set_state(SessionState::FetchingMetadata);
            let fetched = interruptible!(
                shutdown,
                self.transport.fetch_devices(&tokens.token, &self.device_ids)
            );
            match fetched {
                Ok(devices) => {
                    let devices = order_devices(&self.device_ids, devices);
                    if let Some(stop) = self.deliver(shutdown, ReceiverEvent::Devices(devices)).await
                    {
                        return Ok(stop);
                    }
                }
                Err(e) => warn!(error = %e, "Fetching devices failed"),
            }
        }

        self.set_state(SessionState::Streaming);
        self.stream(&mut channel, shutdown).await
    }

    async fn stream(
        &self,
        channel: &mut T::Channel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Stop> {
        loop {
            let frame = interruptible!(
                shutdown,
                timeout(self.settings.reply_timeout, channel.next_frame())
            );
            match frame {
                Ok(Ok(Some(text))) => {
                    if let Some(stop) = self.handle_frame(&text, shutdown).await {
                        return Ok(stop);
                    }
                    continue;
                }
                Ok(Ok(None)) => debug!("Websocket closed, probing"),
                Ok(Err(e)) => debug!(error = %e, "Websocket read failed, probing"),
                Err(_) => debug!(
                    timeout_secs = self.settings.reply_timeout.as_secs(),
                    "No frame received, probing"
                ),
            }

            let pong = interruptible!(
                shutdown,
                timeout(self.settings.ping_timeout, channel.ping())
            );
            match pong {
                Ok(Ok(())) => debug!("Ping ok, keeping connection alive"),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ReceiveError::PingTimeout(
                        self.settings.ping_timeout.as_secs(),
                    ));
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        text: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Stop> {
        debug!(frame = %text, "Server said");
        let mut update: TelemetryUpdate = match serde_json::from_str(text) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed telemetry frame");
                return None;
            }
        };
        if self.settings.values_stringified {
            if let Some(data) = update.data.as_mut() {
                parse_stringified_values(data);
            }
        }
        self.deliver(shutdown, ReceiverEvent::Update(update)).await
    }

    async fn deliver(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        event: ReceiverEvent,
    ) -> Option<Stop> {
        match until_shutdown(shutdown, self.sink.send(event)).await {
            None => Some(Stop::Shutdown),
            Some(Err(_)) => Some(Stop::SinkClosed),
            Some(Ok(())) => None,
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}
