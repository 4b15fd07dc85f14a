use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Result, SerialUnitInfo, Transport, TransportError};

// Crate hub unit identifiers (ESP32-S3 based)
pub const HUB_VID: u16 = 0x303A; // Espressif
pub const HUB_PID: u16 = 0x4001;
pub const BAUD_RATE: u32 = 115_200;

/// Serial/USB transport for hub and factory production units.
pub struct SerialTransport {
    port_name: String,
    stream: Option<SerialStream>,
    unit_info: Option<SerialUnitInfo>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            stream: None,
            unit_info: None,
        }
    }

    /// Enumerate serial ports carrying a hub unit (matched by VID/PID).
    pub fn discover() -> Result<Vec<SerialUnitInfo>> {
        let ports = serialport::available_ports()?;
        let mut units = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                if usb_info.vid == HUB_VID && usb_info.pid == HUB_PID {
                    units.push(SerialUnitInfo {
                        port_name: port.port_name.clone(),
                        vid: usb_info.vid,
                        pid: usb_info.pid,
                        serial_number: usb_info.serial_number.clone(),
                        manufacturer: usb_info.manufacturer.clone(),
                        product: usb_info.product.clone(),
                    });
                }
            }
        }

        Ok(units)
    }

    /// USB descriptor of the connected unit, when it was discoverable.
    pub fn unit_info(&self) -> Option<&SerialUnitInfo> {
        self.unit_info.as_ref()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        let available = serialport::available_ports()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !available.iter().any(|p| p.port_name == self.port_name) {
            return Err(TransportError::Unavailable(format!(
                "port {} not present",
                self.port_name
            )));
        }

        let stream = tokio_serial::new(&self.port_name, BAUD_RATE)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.unit_info = Self::discover()?
            .into_iter()
            .find(|info| info.port_name == self.port_name);
        if self.unit_info.is_none() {
            log::warn!(
                "{} does not identify as a hub unit; connecting anyway",
                self.port_name
            );
        }

        self.stream = Some(stream);
        log::info!("connected to serial unit on {}", self.port_name);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            log::info!("disconnected from {}", self.port_name);
        }
        self.unit_info = None;
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(data).await.map_err(TransportError::IoError)?;
        stream.flush().await.map_err(TransportError::IoError)?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        match timeout(Duration::from_millis(timeout_ms), stream.read(buf)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::Timeout),
            Ok(Err(e)) => Err(TransportError::IoError(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.port_name)
    }
}
