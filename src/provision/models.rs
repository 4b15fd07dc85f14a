use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::link::ErrorCode;

/// Wi-Fi join credentials. The secret is optional so a retry after an
/// authentication failure can keep the network name while forcing the
/// operator to re-enter only the password.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub psk: Option<String>,
}

/// Everything a provisioning session collects before writing to the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub wifi: Option<WifiCredentials>,
    pub mesh_dataset: Option<String>,
    pub cloud_endpoint: Option<String>,
    pub device_name: Option<String>,
}

impl Credentials {
    /// Apply the retry affinity of a device-reported error: an auth failure
    /// clears only the secret; everything else preserves all fields.
    pub fn apply_retry(&mut self, code: ErrorCode) {
        if code.clears_secret() {
            if let Some(wifi) = &mut self.wifi {
                wifi.psk = None;
            }
        }
    }

    /// Whether every supplied credential is complete enough to send.
    pub fn is_complete(&self) -> bool {
        match &self.wifi {
            Some(wifi) => wifi.psk.is_some(),
            None => true,
        }
    }
}

/// Explicit provisioning-session phase, the single source of truth. Any
/// UI booleans ("is busy", "needs password") are derived from this, never
/// the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningStep {
    Idle,
    Connecting,
    CapturingBootWindow,
    Ready,
    AwaitingCredentials,
    Provisioning,
    Validating,
    Persisting,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningVariant {
    /// First-time consumer setup.
    InitialSetup,
    /// Wi-Fi re-provisioning of an already-owned unit.
    Reprovision,
    /// Factory service-mode provisioning of a production unit.
    Factory,
}

impl ProvisioningVariant {
    /// Factory units only take configuration in privileged mode, which must
    /// be captured in the post-boot window.
    pub fn requires_boot_window(&self) -> bool {
        matches!(self, ProvisioningVariant::Factory)
    }

    pub fn uses_factory_schema(&self) -> bool {
        matches!(self, ProvisioningVariant::Factory)
    }

    pub fn record_status(&self) -> RecordStatus {
        match self {
            ProvisioningVariant::Factory => RecordStatus::FactoryProvisioned,
            _ => RecordStatus::Provisioned,
        }
    }
}

/// State of one user-visible setup/re-provision attempt. Persists across
/// reconnect-for-retry; destroyed on explicit reset or completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSession {
    pub id: Uuid,
    pub variant: ProvisioningVariant,
    /// Serial number of the unit this device is being provisioned for.
    pub unit_serial: Option<String>,
    /// Resolved unit record, when the catalog lookup succeeded.
    pub unit_id: Option<Uuid>,
    pub credentials: Credentials,
    pub last_error: Option<ErrorCode>,
    pub step: ProvisioningStep,
}

impl ProvisioningSession {
    pub fn new(variant: ProvisioningVariant) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant,
            unit_serial: None,
            unit_id: None,
            credentials: Credentials::default(),
            last_error: None,
            step: ProvisioningStep::Idle,
        }
    }

    pub fn with_unit_serial(mut self, serial: impl Into<String>) -> Self {
        self.unit_serial = Some(serial.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Explicit reset: everything collected so far is discarded.
    pub fn reset(&mut self) {
        *self = Self::new(self.variant);
    }
}

/// Persistence status of a provisioned identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Provisioned,
    FactoryProvisioned,
}

/// Identity/ownership record written after a validated provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub hardware_id: String,
    pub device_type: String,
    pub owner_unit_id: Option<Uuid>,
    pub provisioned_at: DateTime<Utc>,
    pub provisioned_by: String,
    /// Device-reported configuration, minus fields the identity record
    /// itself owns.
    pub extra: serde_json::Value,
    pub status: RecordStatus,
}

/// Identity/ownership persistence (external collaborator).
#[async_trait]
pub trait DeviceRecordStore: Send + Sync {
    async fn upsert_device_record(&self, record: DeviceRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub serial: String,
    pub name: Option<String>,
}

/// Unit/catalog lookup (external collaborator, advisory only).
#[async_trait]
pub trait UnitCatalog: Send + Sync {
    async fn unit_by_serial(&self, serial: &str) -> anyhow::Result<Option<Unit>>;
}
