mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cratelink::link::{CaptureConfig, CaptureOutcome, LinkConfig, LinkState};

fn fast_capture() -> LinkConfig {
    LinkConfig {
        capture: CaptureConfig {
            window: Duration::from_millis(200),
            interval: Duration::from_millis(50),
        },
        ..LinkConfig::default()
    }
}

#[tokio::test]
async fn test_missed_window_is_recoverable() {
    // The device answers status but never acknowledges service entry, as a
    // device that booted long ago would.
    let (mut session, _injector) =
        common::ready_session_with(fast_capture(), |cmd, _| common::status_answer(cmd)).await;

    let outcome = session
        .enter_privileged_mode()
        .await
        .expect("capture itself must not error");
    match outcome {
        CaptureOutcome::MissedWindow { attempts } => {
            assert!((2..=5).contains(&attempts), "attempts = {attempts}");
        }
        other => panic!("expected missed window, got {other:?}"),
    }
    assert_eq!(session.state(), LinkState::Linked);
    assert!(!session.is_privileged());
}

#[tokio::test]
async fn test_entry_resent_until_acknowledged() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // Silent for the first two entry attempts: the boot window opens on the
    // third.
    let (mut session, _injector) = common::ready_session_with(fast_capture(), move |cmd, _| {
        if cmd == "SVC_ENTER" {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 {
                return vec![common::rsp_ok("SVC_ENTER", common::STATUS_BODY)];
            }
            return vec![];
        }
        common::status_answer(cmd)
    })
    .await;

    let outcome = session.enter_privileged_mode().await.expect("capture");
    assert_eq!(outcome, CaptureOutcome::Entered);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(session.state(), LinkState::Ready);
    assert!(session.is_privileged());
}

#[tokio::test]
async fn test_negative_answer_keeps_resending() {
    // A device outside its window answers ERR immediately; the capture must
    // keep trying until the window budget is spent.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (mut session, _injector) = common::ready_session_with(fast_capture(), move |cmd, _| {
        if cmd == "SVC_ENTER" {
            counter.fetch_add(1, Ordering::SeqCst);
            return vec![common::rsp_err("SVC_ENTER", "window_closed")];
        }
        common::status_answer(cmd)
    })
    .await;

    let outcome = session.enter_privileged_mode().await.expect("capture");
    assert!(matches!(outcome, CaptureOutcome::MissedWindow { .. }));
    // Attempts are paced to the interval, so instant ERR answers still get
    // roughly window/interval sends, never a flood.
    let sent = calls.load(Ordering::SeqCst);
    assert!((2..=5).contains(&sent), "sent = {sent}");
    assert_eq!(session.state(), LinkState::Linked);
}
