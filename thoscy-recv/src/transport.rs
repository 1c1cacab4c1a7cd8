//! Production transport: REST token exchange plus a websocket channel.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::client::{Credentials, DeviceInfo, RestClient, TokenPair};
use crate::error::{ReceiveError, Result};
use crate::receiver::{DuplexChannel, Transport};

const TELEMETRY_PATH: &str = "/api/ws/plugins/telemetry";

/// Talks to a ThingsBoard server over its REST and websocket APIs.
#[derive(Debug, Clone)]
pub struct ThingsBoardTransport {
    rest: RestClient,
    ws_base: String,
    credentials: Credentials,
}

impl ThingsBoardTransport {
    /// Create a transport from the server's http and websocket base URLs.
    pub fn new(
        http_base: impl Into<String>,
        ws_base: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(http_base)?,
            ws_base: ws_base.into(),
            credentials,
        })
    }

    fn telemetry_url(&self, token: &str) -> String {
        format!("{}{}?token={}", self.ws_base, TELEMETRY_PATH, token)
    }
}

#[async_trait]
impl Transport for ThingsBoardTransport {
    type Channel = WebSocketChannel;

    async fn fetch_tokens(&self) -> Result<TokenPair> {
        self.rest.fetch_tokens(&self.credentials).await
    }

    async fn open(&self, token: &str) -> Result<WebSocketChannel> {
        let (stream, _) = connect_async(self.telemetry_url(token)).await?;
        debug!(host = %self.ws_base, "Websocket connected");
        Ok(WebSocketChannel::new(stream))
    }

    async fn fetch_devices(&self, token: &str, ids: &[String]) -> Result<Vec<DeviceInfo>> {
        self.rest.fetch_devices(token, ids).await
    }
}

/// A websocket carrying text frames.
///
/// Text frames that arrive while waiting for a pong are buffered and
/// handed out by the following [`DuplexChannel::next_frame`] calls.
pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<String>,
}

impl WebSocketChannel {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            stream,
            pending: VecDeque::new(),
        }
    }

    /// Read the next message, returning `Ok(None)` once the socket is closed.
    async fn read(&mut self) -> Result<Option<Message>> {
        match self.stream.next().await {
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Websocket closed by server");
                Ok(None)
            }
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<String>> {
        if let Some(text) = self.pending.pop_front() {
            return Ok(Some(text));
        }
        loop {
            match self.read().await? {
                Some(Message::Text(text)) => return Ok(Some(text)),
                Some(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("Ignoring non UTF-8 binary frame"),
                },
                Some(other) => trace!(?other, "Ignoring control frame"),
                None => return Ok(None),
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.stream.send(Message::Ping(Vec::new())).await?;
        loop {
            match self.read().await? {
                Some(Message::Pong(_)) => return Ok(()),
                Some(Message::Text(text)) => self.pending.push_back(text),
                Some(Message::Binary(bytes)) => {
                    if let Ok(text) = String::from_utf8(bytes) {
                        self.pending.push_back(text);
                    }
                }
                Some(_) => {}
                None => return Err(ReceiveError::Closed),
            }
        }
    }
}
