mod common;

use std::time::Duration;

use cratelink::codec::Payload;
use cratelink::link::{
    CaptureConfig, ErrorCode, LinkConfig, LinkError, LinkState,
};
use cratelink::provision::{
    Credentials, FlowOutcome, ProvisioningFlow, ProvisioningSession, ProvisioningStep,
    ProvisioningVariant, RecordStatus, Unit, WifiCredentials,
};
use uuid::Uuid;

const COMMIT_BODY: &str = "hw=CRT-0042,type=hub,serial=SN123,name=LivingRoom,cloud=1,joined=1,ssid=lab";

fn provisioning_device(cmd: &str, params: &Payload) -> Vec<String> {
    match cmd {
        "STATUS" => common::status_answer(cmd),
        "WIFI_SET" => {
            if params.get("psk") == Some("hunter2") {
                vec![common::rsp_ok("WIFI_SET", "")]
            } else {
                vec![common::rsp_err("WIFI_SET", "auth_failed")]
            }
        }
        "CLOUD_SET" => vec![common::rsp_ok("CLOUD_SET", "")],
        "NAME_SET" => vec![common::rsp_ok("NAME_SET", "")],
        "PROV_COMMIT" => vec![common::rsp_ok("PROV_COMMIT", COMMIT_BODY)],
        _ => vec![],
    }
}

fn credentials(psk: &str) -> Credentials {
    Credentials {
        wifi: Some(WifiCredentials {
            ssid: "lab".to_string(),
            psk: Some(psk.to_string()),
        }),
        mesh_dataset: None,
        cloud_endpoint: Some("mqtt.example.com".to_string()),
        device_name: Some("LivingRoom".to_string()),
    }
}

#[tokio::test]
async fn test_initial_setup_completes_and_persists() {
    let (mut link, _injector) = common::ready_session(provisioning_device).await;

    let store = common::MemoryRecordStore::default();
    let unit_id = Uuid::new_v4();
    let catalog = common::MemoryCatalog {
        units: vec![Unit {
            id: unit_id,
            serial: "SN123".to_string(),
            name: Some("Crate 12".to_string()),
        }],
    };
    let registry = common::StaticRegistry::single(&["hw", "type", "cloud"], &["mesh"]);
    let flow = ProvisioningFlow::new(&store, &catalog, &registry, "operator-7");

    let mut session = ProvisioningSession::new(ProvisioningVariant::InitialSetup)
        .with_unit_serial("SN123")
        .with_credentials(credentials("hunter2"));

    let outcome = flow.run(&mut link, &mut session).await.expect("flow");
    assert_eq!(outcome, FlowOutcome::Complete);
    assert_eq!(session.step, ProvisioningStep::Complete);
    assert!(session.last_error.is_none());
    assert_eq!(session.unit_id, Some(unit_id));

    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.hardware_id, "CRT-0042");
    assert_eq!(record.device_type, "hub");
    assert_eq!(record.owner_unit_id, Some(unit_id));
    assert_eq!(record.provisioned_by, "operator-7");
    assert_eq!(record.status, RecordStatus::Provisioned);

    // Identity-owned fields never end up in the free-form extra blob.
    let extra = record.extra.as_object().expect("extra object");
    assert!(!extra.contains_key("hw"));
    assert!(!extra.contains_key("type"));
    assert!(!extra.contains_key("serial"));
    assert!(!extra.contains_key("name"));
    assert_eq!(extra.get("cloud").and_then(|v| v.as_str()), Some("1"));
    assert_eq!(extra.get("ssid").and_then(|v| v.as_str()), Some("lab"));
}

#[tokio::test]
async fn test_auth_failure_clears_only_the_secret() {
    let (mut link, _injector) = common::ready_session(provisioning_device).await;

    let store = common::MemoryRecordStore::default();
    let catalog = common::MemoryCatalog::default();
    let registry = common::StaticRegistry::single(&["hw", "type"], &[]);
    let flow = ProvisioningFlow::new(&store, &catalog, &registry, "operator-7");

    let mut session = ProvisioningSession::new(ProvisioningVariant::InitialSetup)
        .with_credentials(credentials("wrong"));

    let err = flow
        .run(&mut link, &mut session)
        .await
        .expect_err("bad psk must fail");
    assert!(matches!(
        err,
        LinkError::DeviceReported(ErrorCode::AuthFailed)
    ));
    assert_eq!(session.step, ProvisioningStep::Error);
    assert_eq!(session.last_error, Some(ErrorCode::AuthFailed));
    assert!(store.records.lock().unwrap().is_empty());

    flow.retry(&mut link, &mut session).await.expect("retry");
    assert_eq!(session.step, ProvisioningStep::AwaitingCredentials);
    let wifi = session.credentials.wifi.as_ref().expect("wifi kept");
    assert_eq!(wifi.ssid, "lab");
    assert!(wifi.psk.is_none());

    // Without a re-entered secret the next run parks at credential entry
    // instead of sending anything to the device.
    let outcome = flow.run(&mut link, &mut session).await.expect("second run");
    assert_eq!(outcome, FlowOutcome::AwaitingCredentials);
}

#[tokio::test]
async fn test_missing_required_field_blocks_persistence() {
    let (mut link, _injector) = common::ready_session(|cmd, params| {
        if cmd == "PROV_COMMIT" {
            vec![common::rsp_ok("PROV_COMMIT", "hw=CRT-0042,type=hub")]
        } else {
            provisioning_device(cmd, params)
        }
    })
    .await;

    let store = common::MemoryRecordStore::default();
    let catalog = common::MemoryCatalog::default();
    let registry = common::StaticRegistry::single(&["hw", "type", "cloud"], &[]);
    let flow = ProvisioningFlow::new(&store, &catalog, &registry, "operator-7");

    let mut session = ProvisioningSession::new(ProvisioningVariant::InitialSetup)
        .with_credentials(credentials("hunter2"));

    let err = flow
        .run(&mut link, &mut session)
        .await
        .expect_err("incomplete device output must not persist");
    match err {
        LinkError::ValidationFailed { missing } => {
            assert!(missing.contains("cloud"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(store.records.lock().unwrap().is_empty());
    assert_eq!(session.step, ProvisioningStep::Error);
}

#[tokio::test]
async fn test_factory_flow_reports_missed_boot_window() {
    // Factory provisioning needs privileged mode; a device that never
    // acknowledges entry yields a recoverable outcome, not an error.
    let config = LinkConfig {
        capture: CaptureConfig {
            window: Duration::from_millis(200),
            interval: Duration::from_millis(50),
        },
        ..LinkConfig::default()
    };
    let (mut link, _injector) = common::ready_session_with(config, provisioning_device).await;

    let store = common::MemoryRecordStore::default();
    let catalog = common::MemoryCatalog::default();
    let registry = common::StaticRegistry::single(&[], &[]);
    let flow = ProvisioningFlow::new(&store, &catalog, &registry, "factory-line-2");

    let mut session = ProvisioningSession::new(ProvisioningVariant::Factory)
        .with_credentials(credentials("hunter2"));

    let outcome = flow.run(&mut link, &mut session).await.expect("flow");
    assert_eq!(outcome, FlowOutcome::MissedBootWindow);
    assert_eq!(session.step, ProvisioningStep::Connecting);
    assert_eq!(link.state(), LinkState::Linked);
    assert!(store.records.lock().unwrap().is_empty());
}
