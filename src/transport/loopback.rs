use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{Result, Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;

/// In-memory transport backed by a pair of byte channels. The peer half acts
/// as the device: it receives every frame the host sends and can inject
/// arbitrary bytes back. Used by the integration tests to exercise the full
/// reader path without hardware.
pub struct LoopbackTransport {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
    buffered: Vec<u8>,
    connected: bool,
}

/// Device-side half of a loopback pair.
pub struct LoopbackPeer {
    /// Bytes the host wrote.
    pub from_host: mpsc::Receiver<Vec<u8>>,
    /// Bytes to deliver to the host.
    pub to_host: mpsc::Sender<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, LoopbackPeer) {
        let (host_tx, device_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (device_tx, host_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                inbound: host_rx,
                outbound: host_tx,
                buffered: Vec::new(),
                connected: false,
            },
            LoopbackPeer {
                from_host: device_rx,
                to_host: device_tx,
            },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.inbound.close();
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(data.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.buffered.is_empty() {
            match timeout(Duration::from_millis(timeout_ms), self.inbound.recv()).await {
                Ok(Some(chunk)) => self.buffered.extend_from_slice(&chunk),
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => return Err(TransportError::Timeout),
            }
        }

        let n = self.buffered.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.drain(..n);
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}
