use std::time::Instant;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use super::{TagLoopConfig, TagRecord, TagRecordStore, TagWriteSession};
use crate::codec::Payload;
use crate::commands::{self, CommandWeight};
use crate::link::{LinkError, LinkSession, Result};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    /// No new tag for the configured idle timeout.
    Idle,
    /// Every position on the roll has been written.
    RollComplete,
    /// A write failed ahead of verification/locking; a false success in
    /// storage is worse than stalling, so the operator must retry or skip.
    PausedForOperator { position: String, reason: String },
}

/// Continuous detect → write → verify → persist loop for bulk tag rolls.
/// Structurally the same detect/act/retry shape as the provisioning flow,
/// but it keeps cycling until the roll is done or input stops arriving.
pub struct TagWriteLoop<'a> {
    store: &'a dyn TagRecordStore,
    config: TagLoopConfig,
}

impl<'a> TagWriteLoop<'a> {
    pub fn new(store: &'a dyn TagRecordStore) -> Self {
        Self {
            store,
            config: TagLoopConfig::default(),
        }
    }

    pub fn with_config(store: &'a dyn TagRecordStore, config: TagLoopConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(
        &self,
        link: &LinkSession,
        session: &mut TagWriteSession,
    ) -> Result<LoopEnd> {
        let strict = self.config.verify || self.config.lock;
        let mut last_new_tag = Instant::now();

        loop {
            if session.is_roll_complete() {
                log::info!(
                    "roll {} complete: {} written, {} failed",
                    session.roll_id,
                    session.written,
                    session.failed
                );
                return Ok(LoopEnd::RollComplete);
            }
            if last_new_tag.elapsed() >= self.config.idle_timeout {
                log::info!(
                    "no new tag for {:?}; ending roll {}",
                    self.config.idle_timeout,
                    session.roll_id
                );
                return Ok(LoopEnd::Idle);
            }

            sleep(self.config.poll_interval).await;

            let poll = match link
                .run_command(commands::TAG_POLL, Payload::new(), CommandWeight::Query)
                .await
            {
                Ok(response) => response,
                Err(LinkError::CommandTimeout) => continue,
                Err(e) => return Err(e),
            };
            if !poll.ok {
                continue;
            }
            let Some(tag_uid) = poll.payload.get("uid").map(str::to_string) else {
                // No tag in range.
                continue;
            };
            if session.already_seen(&tag_uid) {
                continue;
            }
            last_new_tag = Instant::now();
            session.mark_seen(tag_uid.clone());

            if poll.payload.flag("written").unwrap_or(false) {
                self.record_if_missing(session, &poll.payload, &tag_uid).await;
                continue;
            }

            let position = match session.current_position() {
                Some(p) => p.to_string(),
                None => return Ok(LoopEnd::RollComplete),
            };
            let identifier = Uuid::new_v4().to_string();

            // Let the detection field settle before driving the writer.
            sleep(self.config.settle_delay).await;

            let params = Payload::new()
                .with("uid", &tag_uid)
                .with("ident", &identifier);
            if let Some(reason) = self.command_failure(link, commands::TAG_WRITE, params).await? {
                session.failed += 1;
                if strict {
                    return Ok(LoopEnd::PausedForOperator { position, reason });
                }
                log::warn!(
                    "tag write failed at position {} ({}); continuing roll",
                    position,
                    reason
                );
                continue;
            }

            if self.config.verify || self.config.lock {
                let params = Payload::new()
                    .with("uid", &tag_uid)
                    .with("ident", &identifier);
                if let Some(reason) =
                    self.command_failure(link, commands::TAG_VERIFY, params).await?
                {
                    session.failed += 1;
                    return Ok(LoopEnd::PausedForOperator { position, reason });
                }
            }
            if self.config.lock {
                let params = Payload::new().with("uid", &tag_uid);
                if let Some(reason) = self.command_failure(link, commands::TAG_LOCK, params).await? {
                    session.failed += 1;
                    return Ok(LoopEnd::PausedForOperator { position, reason });
                }
            }

            let record = TagRecord {
                tag_uid,
                identifier,
                roll_id: session.roll_id.clone(),
                position: position.clone(),
                written_at: Utc::now(),
            };
            if let Err(e) = self.store.record_tag(record).await {
                log::warn!("tag record persist failed at position {}: {:#}", position, e);
            }
            session.written += 1;
            session.cursor += 1;
            log::debug!("tag written at position {}", position);
        }
    }

    /// Run one loop command; `Some(reason)` is a per-tag failure that the
    /// loop policy decides how to treat, `Err` ends the whole loop.
    async fn command_failure(
        &self,
        link: &LinkSession,
        name: &str,
        params: Payload,
    ) -> Result<Option<String>> {
        match link.run_command(name, params, CommandWeight::Heavy).await {
            Ok(response) if response.ok => Ok(None),
            Ok(response) => Ok(Some(
                response
                    .payload
                    .get("code")
                    .unwrap_or("device rejected command")
                    .to_string(),
            )),
            Err(LinkError::CommandTimeout) => Ok(Some("command timed out".to_string())),
            Err(e) => Err(e),
        }
    }

    /// A tag that reports itself written may be absent from storage (e.g. a
    /// crash between write and persist); backfill the record without
    /// re-writing the tag.
    async fn record_if_missing(
        &self,
        session: &TagWriteSession,
        payload: &Payload,
        tag_uid: &str,
    ) {
        match self.store.identifier_for(tag_uid).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let Some(identifier) = payload.get("ident") else {
                    log::warn!("written tag {} reported no identifier; skipping backfill", tag_uid);
                    return;
                };
                let record = TagRecord {
                    tag_uid: tag_uid.to_string(),
                    identifier: identifier.to_string(),
                    roll_id: session.roll_id.clone(),
                    position: "recovered".to_string(),
                    written_at: Utc::now(),
                };
                if let Err(e) = self.store.record_tag(record).await {
                    log::warn!("backfill persist failed for tag {}: {:#}", tag_uid, e);
                }
            }
            Err(e) => log::warn!("identifier lookup failed for tag {}: {:#}", tag_uid, e),
        }
    }
}
