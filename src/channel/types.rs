//! Command channel core types.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{Payload, Report};
use crate::link::LinkError;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
        }
    }
}

/// Resolved command call.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub command: String,
    pub ok: bool,
    pub payload: Payload,
}

pub(crate) struct PendingCommand {
    pub spec: CommandSpec,
    pub started: std::time::Instant,
    pub responder: tokio::sync::oneshot::Sender<Result<CommandResponse, LinkError>>,
}

pub(crate) struct CallRequest {
    pub line: String,
    pub spec: CommandSpec,
    pub responder: tokio::sync::oneshot::Sender<Result<CommandResponse, LinkError>>,
}

/// Everything the device volunteers outside of command responses.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A typed report was merged into the snapshot.
    Report(Report),
    /// Verbatim diagnostic line (or unrecognized structured frame).
    Log(String),
    /// The transport dropped; no further events for this generation.
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelMetrics {
    pub lines_read: u64,
    pub reports_seen: u64,
    pub commands_completed: u64,
    pub command_timeouts: u64,
    pub last_error: Option<String>,
    pub command_last_latency_ms: Option<u64>,
    pub command_min_latency_ms: Option<u64>,
    pub command_max_latency_ms: Option<u64>,
    pub command_avg_latency_ms: Option<f64>,
    pub command_ema_latency_ms: Option<f64>,
    pub command_latency_samples: u64,
    pub partial_buffer_trims: u64,
    pub decode_errors: u64,
}

impl ChannelMetrics {
    pub(crate) fn record_latency(&mut self, latency_ms: u64) {
        self.commands_completed += 1;
        self.command_latency_samples += 1;
        self.command_last_latency_ms = Some(latency_ms);
        self.command_min_latency_ms = Some(match self.command_min_latency_ms {
            Some(m) => m.min(latency_ms),
            None => latency_ms,
        });
        self.command_max_latency_ms = Some(match self.command_max_latency_ms {
            Some(m) => m.max(latency_ms),
            None => latency_ms,
        });
        self.command_avg_latency_ms =
            Some(match (self.command_avg_latency_ms, self.command_latency_samples) {
                (Some(avg), samples) if samples > 1 => {
                    ((avg * (samples as f64 - 1.0)) + latency_ms as f64) / samples as f64
                }
                _ => latency_ms as f64,
            });
        self.command_ema_latency_ms = Some(match self.command_ema_latency_ms {
            Some(prev) => (prev * 0.8) + (latency_ms as f64 * 0.2),
            None => latency_ms as f64,
        });
    }
}
