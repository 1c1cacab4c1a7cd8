//! OSC UDP listener.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use thoscy_bridge_framework::until_shutdown;
use thoscy_common::AddressedMessage;
use thoscy_common::osc::decode_datagram;

/// Largest UDP payload.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// A bound OSC receive socket.
pub struct OscListener {
    socket: UdpSocket,
}

impl OscListener {
    /// Bind to `host:port`.
    pub async fn bind(address: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Forward every received message until shutdown or until the
    /// receiving side is dropped.
    ///
    /// Bundles are flattened in order. Undecodable packets are dropped.
    pub async fn run(self, tx: mpsc::Sender<AddressedMessage>, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, "OSC listener started");
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = until_shutdown(&mut shutdown, self.socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                None => break,
                Some(Ok(received)) => received,
                Some(Err(e)) => {
                    warn!(error = %e, "UDP receive error");
                    continue;
                }
            };

            let messages = match decode_datagram(&buf[..len]) {
                Ok(messages) => messages,
                Err(e) => {
                    debug!(%from, error = %e, "Ignoring undecodable packet");
                    continue;
                }
            };

            for message in messages {
                debug!(%from, msg = %message, "Received");
                if tx.send(message).await.is_err() {
                    warn!("Receiver channel closed");
                    return;
                }
            }
        }
        debug!("OSC listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoscy_common::Value;
    use thoscy_common::osc::{encode_bundle, encode_message};

    #[tokio::test]
    async fn test_forwards_messages_and_bundles() {
        let listener = OscListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(tx, stop_rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let single = AddressedMessage::new("/a", vec![Value::Int(1)]);
        let bundled = vec![
            AddressedMessage::new("/b", vec![Value::from("x")]),
            AddressedMessage::new("/c", vec![Value::Bool(true)]),
        ];
        client.send_to(b"garbage", addr).await.unwrap();
        client
            .send_to(&encode_message(&single).unwrap(), addr)
            .await
            .unwrap();
        client
            .send_to(&encode_bundle(&bundled).unwrap(), addr)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(single));
        assert_eq!(rx.recv().await.as_ref(), Some(&bundled[0]));
        assert_eq!(rx.recv().await.as_ref(), Some(&bundled[1]));

        stop_tx.send_replace(true);
        task.await.unwrap();
    }
}
