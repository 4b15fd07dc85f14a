//! Channel reader task: one per transport connection.
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::sleep;

use super::types::*;
use crate::codec::{Frame, FrameDecoder, Report, StatusReport};
use crate::commands;
use crate::link::{DeviceSnapshot, LinkError};
use crate::transport::{Transport, TransportError};

const READ_CHUNK: usize = 512;
const READ_POLL_MS: u64 = 25;
const TIMEOUT_TICK_MS: u64 = 5;

pub(crate) async fn reader_task(
    transport: Arc<Mutex<Box<dyn Transport>>>,
    mut cmd_rx: mpsc::Receiver<CallRequest>,
    mut shutdown_rx: mpsc::Receiver<()>,
    events_tx: broadcast::Sender<LinkEvent>,
    snapshot_tx: watch::Sender<Arc<DeviceSnapshot>>,
    metrics_tx: watch::Sender<ChannelMetrics>,
) {
    let mut decoder = FrameDecoder::new();
    let mut pending: Option<PendingCommand> = None;
    let mut snapshot = DeviceSnapshot::default();
    let mut metrics = ChannelMetrics::default();
    let mut link_lost = false;

    loop {
        select! {
            // Shutdown bypasses the command queue so an in-flight command
            // cannot delay it; the terminal drain below cancels that command.
            _ = shutdown_rx.recv() => break,
            // Single-in-flight discipline: the queue is only drained while no
            // command is pending, so later calls queue instead of clobbering.
            maybe_req = cmd_rx.recv(), if pending.is_none() => {
                match maybe_req {
                    Some(CallRequest { line, spec, responder }) => {
                        let framed = format!("{}\n", line);
                        let send_res = {
                            let mut guard = transport.lock().await;
                            guard.send(framed.as_bytes()).await
                        };
                        if let Err(e) = send_res {
                            let _ = responder.send(Err(LinkError::Transport(e)));
                            continue;
                        }
                        pending = Some(PendingCommand {
                            spec,
                            started: std::time::Instant::now(),
                            responder,
                        });
                    }
                    None => break,
                }
            },
            read_res = async {
                let mut buf = [0u8; READ_CHUNK];
                let res = {
                    let mut guard = transport.lock().await;
                    guard.recv(&mut buf, READ_POLL_MS).await
                };
                res.map(|n| (buf, n))
            } => {
                match read_res {
                    Ok((buf, n)) if n > 0 => {
                        for frame in decoder.push(&buf[..n]) {
                            metrics.lines_read += 1;
                            handle_frame(
                                frame,
                                &mut pending,
                                &events_tx,
                                &mut snapshot,
                                &snapshot_tx,
                                &mut metrics,
                            );
                        }
                        metrics.partial_buffer_trims = decoder.trims;
                        metrics.decode_errors = decoder.decode_errors;
                        let _ = metrics_tx.send(metrics.clone());
                    }
                    Ok(_) => {}
                    Err(TransportError::Timeout) => {}
                    Err(e) => {
                        let msg = format!("transport error: {}", e);
                        log::warn!("{}", msg);
                        metrics.last_error = Some(msg);
                        let _ = metrics_tx.send(metrics.clone());
                        if let Some(p) = pending.take() {
                            let _ = p.responder.send(Err(LinkError::LinkLost));
                        }
                        let _ = events_tx.send(LinkEvent::Dropped);
                        link_lost = true;
                        break;
                    }
                }
            },
            _ = sleep(Duration::from_millis(TIMEOUT_TICK_MS)) => {
                let timed_out = pending
                    .as_ref()
                    .map(|p| p.started.elapsed() > p.spec.timeout)
                    .unwrap_or(false);
                if timed_out {
                    if let Some(p) = pending.take() {
                        metrics.command_timeouts += 1;
                        let _ = metrics_tx.send(metrics.clone());
                        log::warn!(
                            "command '{}' timed out after {:?}",
                            p.spec.name, p.spec.timeout
                        );
                        let _ = p.responder.send(Err(LinkError::CommandTimeout));
                    }
                }
            }
        }
    }

    // Fail the in-flight command and everything still queued, exactly once.
    let terminal = |lost: bool| if lost { LinkError::LinkLost } else { LinkError::Cancelled };
    if let Some(p) = pending.take() {
        let _ = p.responder.send(Err(terminal(link_lost)));
    }
    cmd_rx.close();
    while let Ok(req) = cmd_rx.try_recv() {
        let _ = req.responder.send(Err(terminal(link_lost)));
    }

    // Release the hardware resource with the session.
    let mut guard = transport.lock().await;
    guard.disconnect().await;
}

fn handle_frame(
    frame: Frame,
    pending: &mut Option<PendingCommand>,
    events_tx: &broadcast::Sender<LinkEvent>,
    snapshot: &mut DeviceSnapshot,
    snapshot_tx: &watch::Sender<Arc<DeviceSnapshot>>,
    metrics: &mut ChannelMetrics,
) {
    match frame {
        Frame::Response { command, ok, payload } => {
            // Status-bearing responses refresh the snapshot even when the
            // caller only wanted the acknowledgement.
            if ok && (command == commands::STATUS || command == commands::SVC_ENTER) {
                let report = Report::Status(StatusReport::parse(&payload));
                snapshot.apply(&report);
                let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
            }

            let matched = pending
                .as_ref()
                .map(|p| p.spec.name == command)
                .unwrap_or(false);
            if matched {
                if let Some(p) = pending.take() {
                    let latency_ms = p.started.elapsed().as_millis() as u64;
                    metrics.record_latency(latency_ms);
                    let _ = p.responder.send(Ok(CommandResponse { command, ok, payload }));
                }
            } else {
                // Unsolicited or stale; never merged into a pending call.
                log::debug!("discarding unmatched response for '{}'", command);
            }
        }
        Frame::Notification { kind, payload } => {
            match Report::from_notification(&kind, &payload) {
                Some(report) => {
                    metrics.reports_seen += 1;
                    snapshot.apply(&report);
                    let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
                    let _ = events_tx.send(LinkEvent::Report(report));
                }
                None => {
                    // Unknown kind: keep it visible on the diagnostic stream.
                    let _ = events_tx.send(LinkEvent::Log(format!("EVT:{}:{}", kind, payload.encode())));
                }
            }
        }
        Frame::Log(line) => {
            let _ = events_tx.send(LinkEvent::Log(line));
        }
    }
}
