use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{Payload, Report};

/// Last-known device-reported state, built by merging successive reports in
/// arrival order. `seq == 0` means no report has arrived yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_type: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_id: Option<String>,
    pub joined: Option<bool>,
    pub ssid: Option<String>,
    pub cloud_configured: Option<bool>,
    pub mesh_configured: Option<bool>,
    pub battery: Option<u8>,
    pub rssi: Option<i16>,
    pub extra: Payload,
    pub last_report: Option<DateTime<Utc>>,
    pub seq: u64,
}

impl DeviceSnapshot {
    /// Merge a report, overlaying only the fields its kind is defined to
    /// carry. A heartbeat never clears configuration flags; those are
    /// authoritative only from a full status report.
    pub fn apply(&mut self, report: &Report) {
        match report {
            Report::Status(s) => {
                overlay(&mut self.device_type, &s.device_type);
                overlay(&mut self.firmware_version, &s.firmware_version);
                overlay(&mut self.hardware_id, &s.hardware_id);
                overlay(&mut self.joined, &s.joined);
                overlay(&mut self.ssid, &s.ssid);
                overlay(&mut self.cloud_configured, &s.cloud_configured);
                overlay(&mut self.mesh_configured, &s.mesh_configured);
                overlay(&mut self.battery, &s.battery);
                self.extra.overlay(&s.extra);
            }
            Report::Heartbeat(h) => {
                overlay(&mut self.joined, &h.joined);
                overlay(&mut self.ssid, &h.ssid);
                overlay(&mut self.battery, &h.battery);
                overlay(&mut self.rssi, &h.rssi);
                self.extra.overlay(&h.extra);
            }
        }
        self.last_report = Some(Utc::now());
        self.seq += 1;
    }

    /// Whether any report, full or partial, has been merged.
    pub fn is_populated(&self) -> bool {
        self.seq > 0
    }
}

fn overlay<T: Clone>(field: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *field = Some(value.clone());
    }
}
