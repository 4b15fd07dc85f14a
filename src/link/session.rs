use std::time::Instant;

use tokio::sync::{broadcast, watch};

use super::{
    CaptureOutcome, DeviceSnapshot, ErrorCode, LinkConfig, LinkError, LinkState, LinkStatus,
    Result,
};
use crate::channel::{ChannelBuilder, ChannelHandle, CommandResponse, CommandSpec, LinkEvent};
use crate::codec::Payload;
use crate::commands::{self, CommandWeight};
use crate::provision::Credentials;
use crate::transport::{Transport, TransportTarget};

/// One logical session against one physical device.
///
/// Owns the connection lifecycle exclusively: every `LinkState` transition
/// happens here. Explicitly constructed and explicitly owned: there is no
/// ambient singleton; whichever flow needs the link gets handed the session.
pub struct LinkSession {
    config: LinkConfig,
    channel: Option<ChannelHandle>,
    privileged: bool,
    status_tx: watch::Sender<LinkStatus>,
    status_rx: watch::Receiver<LinkStatus>,
    last_error: Option<String>,
}

impl LinkSession {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(config: LinkConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        Self {
            config,
            channel: None,
            privileged: false,
            status_tx,
            status_rx,
            last_error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.status_rx.borrow().state
    }

    /// Observable link-state stream: current state plus last snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Raw report/log stream for the current connection.
    pub fn subscribe_events(&self) -> Result<broadcast::Receiver<LinkEvent>> {
        Ok(self.channel()?.subscribe_events())
    }

    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        let channel = self.channel.as_ref()?;
        let snapshot = channel.snapshot();
        snapshot.is_populated().then(|| (*snapshot).clone())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LinkState::Ready | LinkState::Provisioning)
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Whether a command can be issued right now. Deliberately true in the
    /// `Error` state too: a session that failed provisioning may still have a
    /// responsive device to soft-reset.
    pub fn can_send_commands(&self) -> bool {
        self.channel.is_some() && !matches!(self.state(), LinkState::Disconnected | LinkState::Connecting)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    /// Connect over an already-constructed transport.
    ///
    /// Transport failure is terminal for this attempt, not for the session;
    /// the caller may retry. A status query that times out leaves the session
    /// `Linked` with the connection open: a device that will not answer
    /// status is still worth inspecting through its raw log stream.
    pub async fn connect(&mut self, mut transport: Box<dyn Transport>) -> Result<()> {
        if self.channel.is_some() && self.state() != LinkState::Disconnected {
            return Err(LinkError::Busy);
        }

        let target = transport.describe();
        self.privileged = false;
        self.publish(LinkState::Connecting, None);
        log::info!("connecting to {}", target);

        if let Err(e) = transport.connect().await {
            log::error!("connection to {} failed: {}", target, e);
            self.publish(LinkState::Error, Some(e.to_string()));
            return Err(e.into());
        }

        let handle = ChannelBuilder::new(transport).build();
        self.spawn_drop_monitor(&handle);
        self.channel = Some(handle);
        self.publish(LinkState::Linked, None);

        match self.query_status().await {
            Ok(_) => {
                self.publish(LinkState::Ready, None);
                log::info!("linked and ready: {}", target);
            }
            Err(LinkError::CommandTimeout) => {
                log::warn!(
                    "{} did not answer status; staying linked for diagnostics",
                    target
                );
            }
            Err(e) => {
                self.publish(LinkState::Error, Some(e.to_string()));
                if let Some(channel) = self.channel.take() {
                    channel.shutdown().await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Connect by target description (collaborator-facing entry point).
    pub async fn connect_target(&mut self, target: &TransportTarget) -> Result<()> {
        self.connect(target.open()).await
    }

    /// Query device status and merge the report into the snapshot. A session
    /// parked in `Linked` (the device would not answer status at connect
    /// time) is promoted to `Ready` once a status query succeeds.
    pub async fn get_status(&mut self) -> Result<DeviceSnapshot> {
        let snapshot = self.query_status().await?;
        if self.state() == LinkState::Linked {
            self.publish(LinkState::Ready, None);
        } else {
            self.refresh();
        }
        Ok(snapshot)
    }

    async fn query_status(&self) -> Result<DeviceSnapshot> {
        let channel = self.channel()?.clone();
        let spec = CommandSpec::new(commands::STATUS, self.config.status_timeout);
        let response = channel.call(spec, Payload::new()).await?;
        if !response.ok {
            return Err(LinkError::DeviceReported(ErrorCode::from_payload(&response.payload)));
        }
        Ok((*channel.snapshot()).clone())
    }

    /// Race the post-boot window for privileged/service mode.
    ///
    /// Resends the entry command every `interval` for at most `window`; the
    /// first affirmative response wins. Attempts are paced to the interval
    /// even when the device answers instantly, so a negative answer never
    /// turns the capture into a flood. An exhausted window drops back to
    /// `Linked` (reconnect and retry) because the miss is expected whenever
    /// the device booted too long ago.
    pub async fn enter_privileged_mode(&mut self) -> Result<CaptureOutcome> {
        let channel = self.channel()?.clone();
        let capture = self.config.capture;
        self.publish(LinkState::EnteringPrivilegedMode, None);

        let mut ticker = tokio::time::interval(capture.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let outcome = loop {
            ticker.tick().await;
            if started.elapsed() >= capture.window {
                break CaptureOutcome::MissedWindow { attempts };
            }
            attempts += 1;
            let spec = CommandSpec::new(commands::SVC_ENTER, capture.interval);
            match channel.call(spec, Payload::new()).await {
                Ok(response) if response.ok => break CaptureOutcome::Entered,
                // Negative answer outside the window; keep resending.
                Ok(_) => {}
                Err(LinkError::CommandTimeout) => {}
                Err(e) => {
                    self.publish(LinkState::Error, Some(e.to_string()));
                    return Err(e);
                }
            }
        };

        match &outcome {
            CaptureOutcome::Entered => {
                log::info!("privileged mode entered after {} attempt(s)", attempts);
                self.privileged = true;
                self.publish(LinkState::Ready, None);
            }
            CaptureOutcome::MissedWindow { attempts } => {
                log::info!(
                    "boot window missed after {} attempt(s); reconnect and retry",
                    attempts
                );
                self.publish(LinkState::Linked, None);
            }
        }
        Ok(outcome)
    }

    /// Issue an arbitrary named command. The raw response is returned; the
    /// caller owns retry policy since idempotence differs per command.
    pub async fn run_command(
        &self,
        name: &str,
        params: Payload,
        weight: CommandWeight,
    ) -> Result<CommandResponse> {
        let channel = self.channel()?.clone();
        channel.call(commands::spec(name, weight), params).await
    }

    /// Like `run_command`, but maps a device `ERR` response into the error
    /// taxonomy and yields just the payload.
    pub async fn checked_command(
        &self,
        name: &str,
        params: Payload,
        weight: CommandWeight,
    ) -> Result<Payload> {
        let response = self.run_command(name, params, weight).await?;
        if response.ok {
            Ok(response.payload)
        } else {
            Err(LinkError::DeviceReported(ErrorCode::from_payload(&response.payload)))
        }
    }

    /// Drive the credential-write sequence on the device and return the
    /// committed configuration as the device itself reports it.
    pub async fn provision(&mut self, credentials: &Credentials) -> Result<Payload> {
        if !self.is_ready() {
            return Err(LinkError::NotConnected);
        }
        self.publish(LinkState::Provisioning, None);
        let result = self.provision_steps(credentials).await;
        match &result {
            Ok(_) => self.publish(LinkState::Ready, None),
            Err(e) => {
                let msg = e.to_string();
                self.publish(LinkState::Error, Some(msg));
            }
        }
        result
    }

    async fn provision_steps(&self, credentials: &Credentials) -> Result<Payload> {
        if let Some(wifi) = &credentials.wifi {
            let psk = wifi
                .psk
                .as_deref()
                .ok_or_else(|| LinkError::Protocol("wifi credentials missing secret".into()))?;
            let params = Payload::new().with("ssid", &wifi.ssid).with("psk", psk);
            self.checked_command(commands::WIFI_SET, params, CommandWeight::Heavy)
                .await?;
        }
        if let Some(dataset) = &credentials.mesh_dataset {
            let params = Payload::new().with("dataset", dataset);
            self.checked_command(commands::MESH_SET, params, CommandWeight::Heavy)
                .await?;
        }
        if let Some(endpoint) = &credentials.cloud_endpoint {
            let params = Payload::new().with("endpoint", endpoint);
            self.checked_command(commands::CLOUD_SET, params, CommandWeight::Control)
                .await?;
        }
        if let Some(name) = &credentials.device_name {
            let params = Payload::new().with("name", name);
            self.checked_command(commands::NAME_SET, params, CommandWeight::Control)
                .await?;
        }
        self.checked_command(commands::PROV_COMMIT, Payload::new(), CommandWeight::Heavy)
            .await
    }

    /// Soft reset: clears partial provisioning state on the device without
    /// dropping the link.
    pub async fn reset(&mut self) -> Result<()> {
        self.checked_command(commands::RESET, Payload::new(), CommandWeight::Control)
            .await?;
        let state = if self.snapshot().is_some() {
            LinkState::Ready
        } else {
            LinkState::Linked
        };
        self.publish(state, None);
        Ok(())
    }

    /// Reboot the device. Never retried blindly; a timeout here is surfaced
    /// to the caller as-is.
    pub async fn reboot(&mut self) -> Result<()> {
        self.checked_command(commands::REBOOT, Payload::new(), CommandWeight::Control)
            .await?;
        self.privileged = false;
        self.publish(LinkState::Linked, None);
        Ok(())
    }

    /// Close the session: fail all pending commands, stop timers, release the
    /// transport.
    pub async fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        self.privileged = false;
        self.publish(LinkState::Disconnected, None);
    }

    fn channel(&self) -> Result<&ChannelHandle> {
        self.channel.as_ref().ok_or(LinkError::NotConnected)
    }

    /// Flip the drop of the transport into a state change even when no call
    /// is in flight to observe it.
    fn spawn_drop_monitor(&self, handle: &ChannelHandle) {
        let mut events = handle.subscribe_events();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LinkEvent::Dropped) => {
                        status_tx.send_modify(|status| {
                            status.state = LinkState::Disconnected;
                            status.last_error = Some("link lost".to_string());
                        });
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn publish(&mut self, state: LinkState, error: Option<String>) {
        if let Some(msg) = &error {
            self.last_error = Some(msg.clone());
        }
        let snapshot = self.snapshot();
        let _ = self.status_tx.send(LinkStatus {
            state,
            snapshot,
            last_error: self.last_error.clone(),
        });
    }

    /// Republish the current state with a fresh snapshot.
    fn refresh(&mut self) {
        let state = self.state();
        self.publish(state, None);
    }
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new()
    }
}
