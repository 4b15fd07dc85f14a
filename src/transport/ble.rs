use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::{Stream, StreamExt};
use tokio::time::timeout;
use uuid::Uuid;

use super::{Result, Transport, TransportError};

// NUS-style link service carried by hub units in pairing mode.
pub const LINK_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const LINK_TX_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const LINK_RX_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Advertised name prefix of a hub unit waiting to be provisioned.
pub const HUB_NAME_PREFIX: &str = "Crate";

const SCAN_SETTLE_SECS: u64 = 5;

/// A peripheral seen during a scan.
#[derive(Debug, Clone)]
pub struct BleUnitInfo {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_hub: bool,
}

/// Short-range wireless transport for consumer hub units.
pub struct BleTransport {
    name_filter: String,
    peripheral: Option<Peripheral>,
    tx_char: Option<Characteristic>,
    // Mutex only to make the struct Sync (required for Send futures over
    // &self); access always goes through get_mut, so it is never contended.
    notifications: Option<Mutex<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>>>,
    buffered: Vec<u8>,
}

impl BleTransport {
    pub fn new(name_filter: impl Into<String>) -> Self {
        Self {
            name_filter: name_filter.into(),
            peripheral: None,
            tx_char: None,
            notifications: None,
            buffered: Vec::new(),
        }
    }

    async fn adapter() -> Result<Adapter> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        adapters
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unavailable("no Bluetooth adapter found".into()))
    }

    /// Scan for peripherals. Hub units carry `is_hub = true`.
    pub async fn scan(duration_secs: u64) -> Result<Vec<BleUnitInfo>> {
        let adapter = Self::adapter().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;

        let mut units = Vec::new();
        for peripheral in adapter.peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
                units.push(BleUnitInfo {
                    is_hub: name.starts_with(HUB_NAME_PREFIX),
                    address: peripheral.address().to_string(),
                    rssi: props.rssi,
                    name,
                });
            }
        }

        adapter.stop_scan().await?;
        Ok(units)
    }

    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Peripheral> {
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(SCAN_SETTLE_SECS)).await;

        for peripheral in adapter.peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                let name = props.local_name.unwrap_or_default();
                if name.contains(&self.name_filter) || peripheral.address().to_string() == self.name_filter {
                    adapter.stop_scan().await?;
                    return Ok(peripheral);
                }
            }
        }

        adapter.stop_scan().await?;
        Err(TransportError::ConnectionFailed(format!(
            "no peripheral matching '{}' in range",
            self.name_filter
        )))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<()> {
        let adapter = Self::adapter().await?;
        let peripheral = self.find_peripheral(&adapter).await?;

        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let chars = peripheral.characteristics();
        let tx_char = chars
            .iter()
            .find(|c| c.uuid == LINK_TX_UUID)
            .cloned()
            .ok_or_else(|| {
                TransportError::ConnectionFailed("peripheral lacks link TX characteristic".into())
            })?;
        let rx_char = chars
            .iter()
            .find(|c| c.uuid == LINK_RX_UUID)
            .cloned()
            .ok_or_else(|| {
                TransportError::ConnectionFailed("peripheral lacks link RX characteristic".into())
            })?;

        peripheral.subscribe(&rx_char).await?;
        self.notifications = Some(Mutex::new(peripheral.notifications().await?));

        log::info!("connected to BLE unit {}", peripheral.address());
        self.tx_char = Some(tx_char);
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                log::debug!("BLE disconnect: {}", e);
            }
            log::info!("disconnected from BLE unit {}", peripheral.address());
        }
        self.tx_char = None;
        self.notifications = None;
        self.buffered.clear();
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        let tx_char = self.tx_char.as_ref().ok_or(TransportError::NotConnected)?;
        peripheral
            .write(tx_char, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if self.buffered.is_empty() {
            let stream = self
                .notifications
                .as_mut()
                .ok_or(TransportError::NotConnected)?
                .get_mut()
                .expect("notification stream mutex poisoned");
            match timeout(Duration::from_millis(timeout_ms), stream.next()).await {
                Ok(Some(notification)) => {
                    if notification.uuid == LINK_RX_UUID {
                        self.buffered.extend_from_slice(&notification.value);
                    }
                }
                Ok(None) => return Err(TransportError::Closed),
                Err(_) => return Err(TransportError::Timeout),
            }
        }

        if self.buffered.is_empty() {
            return Err(TransportError::Timeout);
        }
        let n = self.buffered.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.drain(..n);
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    fn describe(&self) -> String {
        format!("ble:{}", self.name_filter)
    }
}
