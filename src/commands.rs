//! Protocol command vocabulary and default timeout policy.

use std::time::Duration;

use crate::channel::CommandSpec;

// Session / status
pub const STATUS: &str = "STATUS";
pub const SVC_ENTER: &str = "SVC_ENTER";
pub const RESET: &str = "RESET";
pub const REBOOT: &str = "REBOOT";

// Provisioning
pub const WIFI_SET: &str = "WIFI_SET";
pub const MESH_SET: &str = "MESH_SET";
pub const CLOUD_SET: &str = "CLOUD_SET";
pub const NAME_SET: &str = "NAME_SET";
pub const PROV_COMMIT: &str = "PROV_COMMIT";

// Tag writing
pub const TAG_POLL: &str = "TAG_POLL";
pub const TAG_WRITE: &str = "TAG_WRITE";
pub const TAG_VERIFY: &str = "TAG_VERIFY";
pub const TAG_LOCK: &str = "TAG_LOCK";

/// Commands fall into three weights; each carries a default timeout.
/// Status queries answer fast, control commands may touch flash, and heavy
/// commands (credential writes, commits) wait on radio joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandWeight {
    Query,
    Control,
    Heavy,
}

impl CommandWeight {
    pub fn default_timeout(self) -> Duration {
        match self {
            CommandWeight::Query => Duration::from_secs(2),
            CommandWeight::Control => Duration::from_secs(5),
            CommandWeight::Heavy => Duration::from_secs(10),
        }
    }
}

/// Build a spec with the weight's default timeout.
pub fn spec(name: &str, weight: CommandWeight) -> CommandSpec {
    CommandSpec::new(name, weight.default_timeout())
}
