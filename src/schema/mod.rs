//! Field-presence validation of device-reported payloads against
//! per-device-type capability schemas supplied by an external registry.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::Payload;

/// Expected field names for one capability, partitioned required/optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// One capability of a device type, with separate output schemas for the
/// factory and consumer provisioning paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub factory_output_schema: CapabilitySchema,
    pub consumer_output_schema: CapabilitySchema,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub missing_required: BTreeSet<String>,
    pub missing_optional: BTreeSet<String>,
}

impl ValidationResult {
    /// Valid iff no required field is missing. Missing optional fields are a
    /// warning, never a failure.
    pub fn is_valid(&self) -> bool {
        self.missing_required.is_empty()
    }

    /// Accept-everything result used when schema lookup itself fails.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.missing_required.extend(other.missing_required);
        self.missing_optional.extend(other.missing_optional);
    }
}

/// Check every field the schema declares for presence in the payload.
pub fn validate(payload: &Payload, schema: &CapabilitySchema) -> ValidationResult {
    let mut result = ValidationResult::default();
    for field in &schema.required {
        if !payload.contains(field) {
            result.missing_required.insert(field.clone());
        }
    }
    for field in &schema.optional {
        if !payload.contains(field) {
            result.missing_optional.insert(field.clone());
        }
    }
    result
}

/// Device-type capability registry (external collaborator).
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    async fn capabilities_for(&self, device_type: &str) -> anyhow::Result<Vec<Capability>>;
}

/// Validate a payload against every capability schema registered for the
/// device type. A registry failure degrades to a permissive result with a
/// warning; an incomplete admin-side configuration must not brick a working
/// device provisioning.
pub async fn validate_against_registry(
    registry: &dyn CapabilityRegistry,
    device_type: &str,
    payload: &Payload,
    factory: bool,
) -> ValidationResult {
    let capabilities = match registry.capabilities_for(device_type).await {
        Ok(capabilities) => capabilities,
        Err(e) => {
            log::warn!(
                "capability lookup failed for device type '{}': {:#}; accepting payload",
                device_type,
                e
            );
            return ValidationResult::permissive();
        }
    };

    let mut combined = ValidationResult::default();
    for capability in &capabilities {
        let schema = if factory {
            &capability.factory_output_schema
        } else {
            &capability.consumer_output_schema
        };
        combined.merge(validate(payload, schema));
    }
    combined
}
