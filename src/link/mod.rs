pub mod session;
pub mod snapshot;

pub use session::LinkSession;
pub use snapshot::DeviceSnapshot;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection lifecycle phase. One value per active session, owned solely by
/// the `LinkSession`; collaborators derive booleans from it, never the
/// reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Linked,
    EnteringPrivilegedMode,
    Ready,
    Provisioning,
    Error,
}

/// Outward-facing session view published on the status watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub snapshot: Option<DeviceSnapshot>,
    pub last_error: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            snapshot: None,
            last_error: None,
        }
    }
}

/// Boot-window capture parameters: the privileged-mode command is resent
/// every `interval` for at most `window`, because the device only accepts it
/// briefly after its own boot and the two boots are not synchronized.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub window: Duration,
    pub interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            interval: Duration::from_millis(200),
        }
    }
}

/// Result of a boot-window capture. A missed window is an expected,
/// recoverable outcome (reconnect and retry), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Entered,
    MissedWindow { attempts: u32 },
}

/// Session tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub capture: CaptureConfig,
    /// Timeout for the status query issued right after connecting.
    pub status_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            status_timeout: Duration::from_secs(2),
        }
    }
}

/// Closed taxonomy of device-reported failure reasons. Each maps to a short
/// user-facing message; the retry affinity (which credential to clear) is
/// decided by the provisioning flow from this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AuthFailed,
    NetworkNotFound,
    Timeout,
    Malformed,
    Unknown,
}

impl ErrorCode {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("auth_failed") => ErrorCode::AuthFailed,
            Some("network_not_found") => ErrorCode::NetworkNotFound,
            Some("timeout") => ErrorCode::Timeout,
            Some("malformed") => ErrorCode::Malformed,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn from_payload(payload: &crate::codec::Payload) -> Self {
        Self::from_code(payload.get("code"))
    }

    /// Short human-readable message for direct display.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "The network password was rejected. Re-enter it and try again.",
            ErrorCode::NetworkNotFound => "The device could not find that network.",
            ErrorCode::Timeout => "The device stopped responding.",
            ErrorCode::Malformed => "The device rejected the request as malformed.",
            ErrorCode::Unknown => "The device reported an unexpected error.",
        }
    }

    /// Whether the responsible secret should be cleared before a retry.
    pub fn clears_secret(&self) -> bool {
        matches!(self, ErrorCode::AuthFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::NetworkNotFound => "network_not_found",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Malformed => "malformed",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),

    #[error("command timed out")]
    CommandTimeout,

    #[error("link lost")]
    LinkLost,

    #[error("cancelled")]
    Cancelled,

    #[error("a session is already active on this link")]
    Busy,

    #[error("not connected")]
    NotConnected,

    #[error("device reported error: {0}")]
    DeviceReported(ErrorCode),

    #[error("validation failed; missing required fields: {missing:?}")]
    ValidationFailed { missing: BTreeSet<String> },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
