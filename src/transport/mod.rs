pub mod ble;
pub mod loopback;
pub mod serial;

pub use ble::{BleTransport, BleUnitInfo};
pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use serial::SerialTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// USB descriptor fields for a hub unit found on a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialUnitInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Which physical link a session should be established over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportTarget {
    /// Serial/USB port name (e.g. `/dev/ttyACM0`, `COM5`).
    Serial { port_name: String },
    /// BLE peripheral matched by advertised name fragment.
    Ble { name: String },
}

impl TransportTarget {
    /// Build the matching transport, unconnected.
    pub fn open(&self) -> Box<dyn Transport> {
        match self {
            TransportTarget::Serial { port_name } => Box::new(SerialTransport::new(port_name)),
            TransportTarget::Ble { name } => Box::new(BleTransport::new(name)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport timeout")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("link closed by peer")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    SerialportError(#[from] serialport::Error),

    #[error("BLE error: {0}")]
    BleError(#[from] btleplug::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One capability set over both physical links: connect, disconnect,
/// send bytes, receive bytes with a bounded wait. Everything above this
/// trait is transport-agnostic.
#[async_trait]
pub trait Transport: Send {
    /// Acquire the underlying hardware resource (open port / pair radio).
    async fn connect(&mut self) -> Result<()>;

    /// Release the hardware resource. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Write raw bytes to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read raw bytes, waiting at most `timeout_ms`. Returns the number of
    /// bytes placed in `buf`; `TransportError::Timeout` means no data yet,
    /// `TransportError::Closed` means the link is gone.
    async fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;

    fn is_connected(&self) -> bool;

    /// Human-readable target description for logs.
    fn describe(&self) -> String;
}
