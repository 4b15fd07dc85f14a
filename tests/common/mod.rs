#![allow(dead_code)]
//! Shared helpers: a scripted fake device driven over the loopback
//! transport, plus in-memory collaborator implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cratelink::codec::Payload;
use cratelink::link::{LinkConfig, LinkSession};
use cratelink::provision::{DeviceRecord, DeviceRecordStore, Unit, UnitCatalog};
use cratelink::schema::{Capability, CapabilityRegistry, CapabilitySchema};
use cratelink::tagwrite::{TagRecord, TagRecordStore};
use cratelink::transport::{LoopbackPeer, LoopbackTransport};

pub const STATUS_BODY: &str =
    "type=hub,fw=2.4.1,hw=CRT-0042,joined=1,ssid=lab,cloud=1,mesh=0,battery=77";

pub fn rsp_ok(cmd: &str, body: &str) -> String {
    if body.is_empty() {
        format!("RSP:{cmd}:OK")
    } else {
        format!("RSP:{cmd}:OK:{body}")
    }
}

pub fn rsp_err(cmd: &str, code: &str) -> String {
    format!("RSP:{cmd}:ERR:code={code}")
}

/// Run a scripted device on the peer half of a loopback pair. The handler is
/// invoked once per received command line and returns the lines to send
/// back; an empty vec means stay silent.
pub fn spawn_device<F>(mut peer: LoopbackPeer, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(&str, &Payload) -> Vec<String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut partial = String::new();
        while let Some(chunk) = peer.from_host.recv().await {
            partial.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = partial.find('\n') {
                let line = partial[..pos].trim().to_string();
                partial.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                let (name, params) = match line.split_once(':') {
                    Some((name, body)) => (name.to_string(), Payload::parse(body)),
                    None => (line, Payload::new()),
                };
                for response in handler(&name, &params) {
                    if peer
                        .to_host
                        .send(format!("{response}\n").into_bytes())
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    })
}

/// Handler fragment: answer status queries with the canonical hub status.
pub fn status_answer(cmd: &str) -> Vec<String> {
    if cmd == "STATUS" {
        vec![rsp_ok("STATUS", STATUS_BODY)]
    } else {
        vec![]
    }
}

/// Connect a session against a scripted device; returns the session and an
/// injector for unsolicited device output.
pub async fn ready_session<F>(handler: F) -> (LinkSession, mpsc::Sender<Vec<u8>>)
where
    F: FnMut(&str, &Payload) -> Vec<String> + Send + 'static,
{
    ready_session_with(LinkConfig::default(), handler).await
}

pub async fn ready_session_with<F>(
    config: LinkConfig,
    handler: F,
) -> (LinkSession, mpsc::Sender<Vec<u8>>)
where
    F: FnMut(&str, &Payload) -> Vec<String> + Send + 'static,
{
    let (transport, peer) = LoopbackTransport::pair();
    let injector = peer.to_host.clone();
    spawn_device(peer, handler);

    let mut session = LinkSession::with_config(config);
    session
        .connect(Box::new(transport))
        .await
        .expect("connect failed");
    (session, injector)
}

// ---------------------------------------------------------------------------
// In-memory collaborators

#[derive(Default)]
pub struct MemoryRecordStore {
    pub records: Mutex<Vec<DeviceRecord>>,
}

#[async_trait]
impl DeviceRecordStore for MemoryRecordStore {
    async fn upsert_device_record(&self, record: DeviceRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.hardware_id != record.hardware_id);
        records.push(record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    pub units: Vec<Unit>,
}

#[async_trait]
impl UnitCatalog for MemoryCatalog {
    async fn unit_by_serial(&self, serial: &str) -> anyhow::Result<Option<Unit>> {
        Ok(self.units.iter().find(|u| u.serial == serial).cloned())
    }
}

pub struct StaticRegistry {
    pub capabilities: Vec<Capability>,
}

impl StaticRegistry {
    /// Single capability with identical factory and consumer schemas.
    pub fn single(required: &[&str], optional: &[&str]) -> Self {
        let schema = CapabilitySchema {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            capabilities: vec![Capability {
                name: "link".to_string(),
                factory_output_schema: schema.clone(),
                consumer_output_schema: schema,
            }],
        }
    }
}

#[async_trait]
impl CapabilityRegistry for StaticRegistry {
    async fn capabilities_for(&self, _device_type: &str) -> anyhow::Result<Vec<Capability>> {
        Ok(self.capabilities.clone())
    }
}

pub struct FailingRegistry;

#[async_trait]
impl CapabilityRegistry for FailingRegistry {
    async fn capabilities_for(&self, _device_type: &str) -> anyhow::Result<Vec<Capability>> {
        anyhow::bail!("capability registry unreachable")
    }
}

#[derive(Default)]
pub struct MemoryTagStore {
    pub records: Mutex<Vec<TagRecord>>,
}

#[async_trait]
impl TagRecordStore for MemoryTagStore {
    async fn record_tag(&self, record: TagRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn identifier_for(&self, tag_uid: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.tag_uid == tag_uid)
            .map(|r| r.identifier.clone()))
    }
}
