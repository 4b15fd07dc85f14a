pub mod reader;
pub mod types;

pub use types::{ChannelMetrics, CommandResponse, CommandSpec, LinkEvent};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};

use crate::codec::Payload;
use crate::link::{DeviceSnapshot, LinkError};
use crate::transport::Transport;
use types::CallRequest;

const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Handle onto one transport connection's reader task. Cheap to clone; all
/// clones talk to the same single-in-flight command queue.
#[derive(Clone)]
pub struct ChannelHandle {
    cmd_tx: mpsc::Sender<CallRequest>,
    shutdown_tx: mpsc::Sender<()>,
    events_tx: broadcast::Sender<LinkEvent>,
    snapshot_rx: watch::Receiver<Arc<DeviceSnapshot>>,
    metrics_rx: watch::Receiver<ChannelMetrics>,
}

impl ChannelHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn snapshot_receiver(&self) -> watch::Receiver<Arc<DeviceSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn metrics(&self) -> ChannelMetrics {
        self.metrics_rx.borrow().clone()
    }

    /// Issue a command and wait for its correlated response, the spec
    /// timeout, or loss of the link, whichever comes first. Never retries.
    pub async fn call(&self, spec: CommandSpec, params: Payload) -> Result<CommandResponse, LinkError> {
        let line = if params.is_empty() {
            spec.name.clone()
        } else {
            format!("{}:{}", spec.name, params.encode())
        };
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CallRequest { line, spec, responder: tx })
            .await
            .map_err(|_| LinkError::LinkLost)?;
        rx.await.map_err(|_| LinkError::LinkLost)?
    }

    /// Stop the reader task. The in-flight command and everything still
    /// queued fail with `Cancelled` immediately; the transport is released.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

pub struct ChannelBuilder {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    event_capacity: usize,
    command_capacity: usize,
}

impl ChannelBuilder {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }

    pub fn build(self) -> ChannelHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.command_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (events_tx, _events_rx) = broadcast::channel(self.event_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(DeviceSnapshot::default()));
        let (metrics_tx, metrics_rx) = watch::channel(ChannelMetrics::default());

        tokio::spawn(reader::reader_task(
            self.transport,
            cmd_rx,
            shutdown_rx,
            events_tx.clone(),
            snapshot_tx,
            metrics_tx,
        ));

        ChannelHandle {
            cmd_tx,
            shutdown_tx,
            events_tx,
            snapshot_rx,
            metrics_rx,
        }
    }
}
