mod common;

use cratelink::codec::Payload;
use cratelink::schema::{validate, validate_against_registry, CapabilitySchema};

fn schema() -> CapabilitySchema {
    CapabilitySchema {
        required: vec!["a".to_string(), "b".to_string()],
        optional: vec!["c".to_string()],
    }
}

#[test]
fn test_empty_payload_misses_everything() {
    let result = validate(&Payload::new(), &schema());
    assert!(!result.is_valid());
    assert_eq!(
        result.missing_required.iter().cloned().collect::<Vec<_>>(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(result.missing_optional.contains("c"));
}

#[test]
fn test_complete_payload_is_valid() {
    let payload = Payload::new().with("a", "1").with("b", "2").with("c", "3");
    let result = validate(&payload, &schema());
    assert!(result.is_valid());
    assert!(result.missing_required.is_empty());
    assert!(result.missing_optional.is_empty());
}

#[test]
fn test_missing_optional_is_warning_not_failure() {
    let payload = Payload::new().with("a", "1").with("b", "2");
    let result = validate(&payload, &schema());
    assert!(result.is_valid());
    assert!(result.missing_optional.contains("c"));
}

#[tokio::test]
async fn test_registry_failure_is_permissive() {
    // An unreachable registry must not block a working provisioning.
    let result =
        validate_against_registry(&common::FailingRegistry, "hub", &Payload::new(), false).await;
    assert!(result.is_valid());
    assert!(result.missing_required.is_empty());
}

#[tokio::test]
async fn test_registry_schemas_are_enforced() {
    let registry = common::StaticRegistry::single(&["hw", "cloud"], &["mesh"]);
    let payload = Payload::new().with("hw", "CRT-1");
    let result = validate_against_registry(&registry, "hub", &payload, false).await;
    assert!(!result.is_valid());
    assert!(result.missing_required.contains("cloud"));
    assert!(result.missing_optional.contains("mesh"));
}
