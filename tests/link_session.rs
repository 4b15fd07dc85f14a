mod common;

use std::time::Duration;

use tokio::time::sleep;

use cratelink::channel::LinkEvent;
use cratelink::link::{LinkConfig, LinkError, LinkState};
use cratelink::transport::LoopbackTransport;

#[tokio::test]
async fn test_connect_reaches_ready_with_snapshot() {
    let (session, _injector) = common::ready_session(|cmd, _| common::status_answer(cmd)).await;

    assert_eq!(session.state(), LinkState::Ready);
    assert!(session.is_ready());
    assert!(session.can_send_commands());

    let snapshot = session.snapshot().expect("snapshot after status");
    assert_eq!(snapshot.firmware_version.as_deref(), Some("2.4.1"));
    assert_eq!(snapshot.hardware_id.as_deref(), Some("CRT-0042"));
    assert_eq!(snapshot.device_type.as_deref(), Some("hub"));
    assert_eq!(snapshot.cloud_configured, Some(true));
    assert_eq!(snapshot.mesh_configured, Some(false));
    assert_eq!(snapshot.battery, Some(77));
}

#[tokio::test]
async fn test_silent_device_stays_linked_for_diagnostics() {
    let config = LinkConfig {
        status_timeout: Duration::from_millis(100),
        ..LinkConfig::default()
    };
    let (session, injector) = common::ready_session_with(config, |_, _| vec![]).await;

    assert_eq!(session.state(), LinkState::Linked);
    assert!(!session.is_ready());
    assert!(session.can_send_commands());
    assert!(session.snapshot().is_none());

    // The raw log stream still works on a device that ignores commands.
    let mut events = session.subscribe_events().expect("events");
    injector
        .send(b"boot: radio calibration ok\n".to_vec())
        .await
        .expect("inject");
    loop {
        match events.recv().await {
            Ok(LinkEvent::Log(line)) => {
                assert_eq!(line, "boot: radio calibration ok");
                break;
            }
            Ok(_) => {}
            Err(e) => panic!("event stream closed: {e}"),
        }
    }
}

#[tokio::test]
async fn test_late_status_promotes_linked_to_ready() {
    // Device too slow to answer the connect-time status query, responsive
    // afterwards. The first successful status query must finish the
    // promotion to Ready so provisioning can proceed without reconnecting.
    let config = LinkConfig {
        status_timeout: Duration::from_millis(100),
        ..LinkConfig::default()
    };
    let mut status_calls = 0u32;
    let (mut session, _injector) = common::ready_session_with(config, move |cmd, _| {
        if cmd == "STATUS" {
            status_calls += 1;
            if status_calls == 1 {
                return vec![];
            }
        }
        common::status_answer(cmd)
    })
    .await;
    assert_eq!(session.state(), LinkState::Linked);
    assert!(!session.is_ready());

    let snapshot = session.get_status().await.expect("second status");
    assert_eq!(snapshot.hardware_id.as_deref(), Some("CRT-0042"));
    assert_eq!(session.state(), LinkState::Ready);
    assert!(session.is_ready());
}

#[tokio::test]
async fn test_connect_while_active_is_busy() {
    let (mut session, _injector) = common::ready_session(|cmd, _| common::status_answer(cmd)).await;

    let (transport, _peer) = LoopbackTransport::pair();
    let err = session
        .connect(Box::new(transport))
        .await
        .expect_err("second connect must be rejected");
    assert!(matches!(err, LinkError::Busy));
    // The original connection is untouched.
    assert_eq!(session.state(), LinkState::Ready);
}

#[tokio::test]
async fn test_heartbeat_never_clears_configuration() {
    let (session, injector) = common::ready_session(|cmd, _| common::status_answer(cmd)).await;
    let before = session.snapshot().expect("initial snapshot");
    assert_eq!(before.cloud_configured, Some(true));

    injector
        .send(b"EVT:HEARTBEAT:joined=0,battery=12,rssi=-70\n".to_vec())
        .await
        .expect("inject");

    let mut after = None;
    for _ in 0..40 {
        if let Some(snapshot) = session.snapshot() {
            if snapshot.seq > before.seq {
                after = Some(snapshot);
                break;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    let after = after.expect("heartbeat merged");
    assert_eq!(after.joined, Some(false));
    assert_eq!(after.battery, Some(12));
    assert_eq!(after.rssi, Some(-70));
    // A heartbeat carries no configuration fields; the last full status
    // remains authoritative for them.
    assert_eq!(after.cloud_configured, Some(true));
    assert_eq!(after.mesh_configured, Some(false));
}

#[tokio::test]
async fn test_disconnect_then_reconnect() {
    let (mut session, _injector) = common::ready_session(|cmd, _| common::status_answer(cmd)).await;

    session.disconnect().await;
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(!session.can_send_commands());

    // A fresh transport may be connected on the same session.
    let (transport, peer) = LoopbackTransport::pair();
    common::spawn_device(peer, |cmd, _| common::status_answer(cmd));
    session
        .connect(Box::new(transport))
        .await
        .expect("reconnect");
    assert_eq!(session.state(), LinkState::Ready);
}
