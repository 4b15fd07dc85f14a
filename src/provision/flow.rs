use chrono::Utc;

use super::models::*;
use crate::link::{CaptureOutcome, ErrorCode, LinkError, LinkSession, Result};
use crate::schema::{self, CapabilityRegistry};

/// Non-error outcomes of one drive through the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Complete,
    /// The privileged-mode window was missed; reconnect and run again.
    MissedBootWindow,
    /// Credentials are incomplete (e.g. secret cleared by a retry); collect
    /// them and run again.
    AwaitingCredentials,
}

/// Drives the ordered steps of a provisioning session over a live link:
/// status check, credential writes, commit, schema validation, persistence.
///
/// Retry affinity lives here rather than in the command channel because only
/// this layer knows which credential, if any, a given failure invalidates.
pub struct ProvisioningFlow<'a> {
    store: &'a dyn DeviceRecordStore,
    catalog: &'a dyn UnitCatalog,
    registry: &'a dyn CapabilityRegistry,
    operator: String,
}

impl<'a> ProvisioningFlow<'a> {
    pub fn new(
        store: &'a dyn DeviceRecordStore,
        catalog: &'a dyn UnitCatalog,
        registry: &'a dyn CapabilityRegistry,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            registry,
            operator: operator.into(),
        }
    }

    /// Run the session to completion or failure. The session's step cursor
    /// and last error are updated as the flow advances, so a UI observing the
    /// session always sees the real phase.
    pub async fn run(
        &self,
        link: &mut LinkSession,
        session: &mut ProvisioningSession,
    ) -> Result<FlowOutcome> {
        let result = self.drive(link, session).await;
        match &result {
            Ok(FlowOutcome::Complete) => {
                session.step = ProvisioningStep::Complete;
                session.last_error = None;
            }
            Ok(FlowOutcome::MissedBootWindow) => {
                session.step = ProvisioningStep::Connecting;
            }
            Ok(FlowOutcome::AwaitingCredentials) => {
                session.step = ProvisioningStep::AwaitingCredentials;
            }
            Err(e) => {
                session.last_error = Some(match e {
                    LinkError::DeviceReported(code) => *code,
                    LinkError::CommandTimeout | LinkError::LinkLost => ErrorCode::Timeout,
                    _ => ErrorCode::Unknown,
                });
                session.step = ProvisioningStep::Error;
            }
        }
        result
    }

    async fn drive(
        &self,
        link: &mut LinkSession,
        session: &mut ProvisioningSession,
    ) -> Result<FlowOutcome> {
        session.step = ProvisioningStep::Connecting;
        if !link.can_send_commands() {
            return Err(LinkError::NotConnected);
        }

        if session.variant.requires_boot_window() && !link.is_privileged() {
            session.step = ProvisioningStep::CapturingBootWindow;
            match link.enter_privileged_mode().await? {
                CaptureOutcome::Entered => {}
                CaptureOutcome::MissedWindow { .. } => {
                    return Ok(FlowOutcome::MissedBootWindow);
                }
            }
        }

        session.step = ProvisioningStep::Ready;
        // Provisioning is strict about the status check: unlike interactive
        // diagnostics, a silent device here fails the attempt.
        let snapshot = link.get_status().await?;

        session.step = ProvisioningStep::AwaitingCredentials;
        if !session.credentials.is_complete() {
            return Ok(FlowOutcome::AwaitingCredentials);
        }

        session.step = ProvisioningStep::Provisioning;
        let committed = link.provision(&session.credentials).await?;

        session.step = ProvisioningStep::Validating;
        // The persisted payload is built from the device's own response, not
        // the input credentials; identity fields live in the record proper.
        let mut reported = committed.clone();
        let hardware_id = reported
            .remove("hw")
            .or_else(|| snapshot.hardware_id.clone())
            .ok_or_else(|| LinkError::Protocol("device response missing hardware id".into()))?;
        let device_type = reported
            .remove("type")
            .or_else(|| snapshot.device_type.clone())
            .ok_or_else(|| LinkError::Protocol("device response missing device type".into()))?;
        reported.remove("serial");
        reported.remove("name");

        let validation = schema::validate_against_registry(
            self.registry,
            &device_type,
            &committed,
            session.variant.uses_factory_schema(),
        )
        .await;
        if !validation.is_valid() {
            return Err(LinkError::ValidationFailed {
                missing: validation.missing_required,
            });
        }
        if !validation.missing_optional.is_empty() {
            log::warn!(
                "device '{}' response missing optional fields: {:?}",
                hardware_id,
                validation.missing_optional
            );
        }

        session.step = ProvisioningStep::Persisting;
        let owner_unit_id = match &session.unit_serial {
            Some(serial) => match self.catalog.unit_by_serial(serial).await {
                Ok(unit) => unit.map(|u| u.id),
                Err(e) => {
                    // Advisory lookup; degrade instead of blocking.
                    log::warn!("unit lookup failed for serial '{}': {:#}", serial, e);
                    None
                }
            },
            None => None,
        };
        session.unit_id = owner_unit_id.or(session.unit_id);

        let record = DeviceRecord {
            hardware_id,
            device_type,
            owner_unit_id: session.unit_id,
            provisioned_at: Utc::now(),
            provisioned_by: self.operator.clone(),
            extra: reported.to_json(),
            status: session.variant.record_status(),
        };
        self.store
            .upsert_device_record(record)
            .await
            .map_err(|e| LinkError::Protocol(format!("record upsert failed: {:#}", e)))?;

        Ok(FlowOutcome::Complete)
    }

    /// Prepare the session for another attempt after an error, per the retry
    /// affinity of the last error code. Credential-class failures re-enter
    /// `AwaitingCredentials`; anything else soft-resets a responsive device,
    /// or falls back to a full reconnect when the device has gone quiet.
    pub async fn retry(
        &self,
        link: &mut LinkSession,
        session: &mut ProvisioningSession,
    ) -> Result<()> {
        let Some(code) = session.last_error else {
            session.step = ProvisioningStep::AwaitingCredentials;
            return Ok(());
        };
        session.credentials.apply_retry(code);

        match code {
            ErrorCode::AuthFailed | ErrorCode::NetworkNotFound => {
                session.step = ProvisioningStep::AwaitingCredentials;
                Ok(())
            }
            _ => {
                if link.can_send_commands() {
                    match link.reset().await {
                        Ok(()) => {
                            session.step = ProvisioningStep::AwaitingCredentials;
                            return Ok(());
                        }
                        Err(e) => {
                            log::warn!("soft reset failed ({}); falling back to reconnect", e);
                        }
                    }
                }
                link.disconnect().await;
                session.step = ProvisioningStep::Connecting;
                Ok(())
            }
        }
    }
}
