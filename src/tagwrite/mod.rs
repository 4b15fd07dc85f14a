pub mod runner;

pub use runner::{LoopEnd, TagWriteLoop};

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one bulk tag-writing run over a roll of hardware tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWriteSession {
    pub roll_id: String,
    /// Ordered tag positions on the roll.
    pub positions: Vec<String>,
    pub cursor: usize,
    pub written: u32,
    pub failed: u32,
    /// Identifiers already acted on; a tag sitting in range must not be
    /// processed twice.
    seen: HashSet<String>,
}

impl TagWriteSession {
    pub fn new(roll_id: impl Into<String>, positions: Vec<String>) -> Self {
        Self {
            roll_id: roll_id.into(),
            positions,
            cursor: 0,
            written: 0,
            failed: 0,
            seen: HashSet::new(),
        }
    }

    pub fn already_seen(&self, tag_uid: &str) -> bool {
        self.seen.contains(tag_uid)
    }

    pub fn mark_seen(&mut self, tag_uid: impl Into<String>) {
        self.seen.insert(tag_uid.into());
    }

    pub fn current_position(&self) -> Option<&str> {
        self.positions.get(self.cursor).map(String::as_str)
    }

    pub fn is_roll_complete(&self) -> bool {
        self.cursor >= self.positions.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TagLoopConfig {
    /// Pause between detection polls.
    pub poll_interval: Duration,
    /// Loop ends once no new tag has appeared for this long.
    pub idle_timeout: Duration,
    /// Settle delay after a poll before issuing a write.
    pub settle_delay: Duration,
    /// Read back and compare after each write.
    pub verify: bool,
    /// Permanently lock each tag after writing. Implies verification.
    pub lock: bool,
}

impl Default for TagLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            idle_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(150),
            verify: false,
            lock: false,
        }
    }
}

/// Persisted association between a physical tag and its identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag_uid: String,
    pub identifier: String,
    pub roll_id: String,
    pub position: String,
    pub written_at: DateTime<Utc>,
}

/// Tag persistence (external collaborator).
#[async_trait]
pub trait TagRecordStore: Send + Sync {
    async fn record_tag(&self, record: TagRecord) -> anyhow::Result<()>;

    /// Identifier previously recorded for a tag, if any.
    async fn identifier_for(&self, tag_uid: &str) -> anyhow::Result<Option<String>>;
}
