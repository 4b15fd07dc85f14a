use serde::{Deserialize, Serialize};

use super::Payload;

/// Notification kinds the codec understands.
pub const KIND_STATUS: &str = "STATUS";
pub const KIND_HEARTBEAT: &str = "HEARTBEAT";

/// A device report the snapshot layer knows how to merge. Each kind is typed
/// for the fields it is defined to carry; unknown keys land in `extra` for
/// forward compatibility instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Report {
    Status(StatusReport),
    Heartbeat(HeartbeatReport),
}

impl Report {
    pub fn from_notification(kind: &str, payload: &Payload) -> Option<Self> {
        match kind {
            KIND_STATUS => Some(Report::Status(StatusReport::parse(payload))),
            KIND_HEARTBEAT => Some(Report::Heartbeat(HeartbeatReport::parse(payload))),
            _ => None,
        }
    }
}

/// Full status report. The only report kind authoritative for the
/// configuration flags (`cloud`, `mesh`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub device_type: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_id: Option<String>,
    pub joined: Option<bool>,
    pub ssid: Option<String>,
    pub cloud_configured: Option<bool>,
    pub mesh_configured: Option<bool>,
    pub battery: Option<u8>,
    pub extra: Payload,
}

impl StatusReport {
    pub fn parse(payload: &Payload) -> Self {
        let mut report = Self {
            device_type: payload.get("type").map(str::to_string),
            firmware_version: payload.get("fw").map(str::to_string),
            hardware_id: payload.get("hw").map(str::to_string),
            joined: payload.flag("joined"),
            ssid: payload.get("ssid").map(str::to_string),
            cloud_configured: payload.flag("cloud"),
            mesh_configured: payload.flag("mesh"),
            battery: payload.number("battery"),
            extra: Payload::new(),
        };
        for (k, v) in payload.iter() {
            if !matches!(
                k,
                "type" | "fw" | "hw" | "joined" | "ssid" | "cloud" | "mesh" | "battery"
            ) {
                report.extra.set(k, v);
            }
        }
        report
    }
}

/// Lightweight periodic announcement. Carries connection-state sub-fields
/// and telemetry only; never configuration flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub joined: Option<bool>,
    pub ssid: Option<String>,
    pub battery: Option<u8>,
    pub rssi: Option<i16>,
    pub extra: Payload,
}

impl HeartbeatReport {
    pub fn parse(payload: &Payload) -> Self {
        let mut report = Self {
            joined: payload.flag("joined"),
            ssid: payload.get("ssid").map(str::to_string),
            battery: payload.number("battery"),
            rssi: payload.number("rssi"),
            extra: Payload::new(),
        };
        for (k, v) in payload.iter() {
            if !matches!(k, "joined" | "ssid" | "battery" | "rssi") {
                report.extra.set(k, v);
            }
        }
        report
    }
}
