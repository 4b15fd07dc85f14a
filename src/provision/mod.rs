pub mod flow;
pub mod models;

pub use flow::{FlowOutcome, ProvisioningFlow};
pub use models::{
    Credentials, DeviceRecord, DeviceRecordStore, ProvisioningSession, ProvisioningStep,
    ProvisioningVariant, RecordStatus, Unit, UnitCatalog, WifiCredentials,
};
