//! Device registry: `device_id -> DeviceRecord`, online-status derivation,
//! and token persistence.

use crate::error::Result;
use crate::persist;
use bridge_wire::{AnnouncePayload, StatusPayload, ToolDescriptor};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Age, in seconds, after which a device with no fresher `status` is
/// considered offline.
pub const ONLINE_THRESHOLD_SECS: i64 = 90;

/// The wire format `status.ts` is expected in: `YYYY-MM-DDTHH:MM:SSZ`.
const STATUS_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Broker,
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    pub version: String,
    pub tools: Vec<ToolDescriptor>,
    pub last_announce: Option<DateTime<Utc>>,
    pub last_status: Option<StatusPayload>,
    pub last_seen: Option<DateTime<Utc>>,
    pub protocol: Protocol,
    pub secret_token: Option<String>,
}

impl DeviceRecord {
    /// `online == (now - last_status.ts) < 90s` — derived on every read,
    /// never cached on the record itself — online status is always
    /// computed fresh, never stored stale.
    #[must_use]
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        let Some(status) = &self.last_status else {
            return false;
        };
        let Some(ts) = &status.ts else {
            return false;
        };
        let Ok(naive) = NaiveDateTime::parse_from_str(ts, STATUS_TS_FORMAT) else {
            return false;
        };
        let parsed = naive.and_utc();
        (now - parsed).num_seconds() < ONLINE_THRESHOLD_SECS
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.is_online_at(Utc::now())
    }

    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Serialized snapshot shape (optional persistence of tokens across
/// restarts).
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    devices: HashMap<String, DeviceRecord>,
}

pub struct DeviceRegistry {
    inner: RwLock<HashMap<String, DeviceRecord>>,
    snapshot_path: Option<PathBuf>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(snapshot_path: Option<PathBuf>) -> Arc<Self> {
        let devices = snapshot_path
            .as_deref()
            .and_then(|p| persist::load_or_default::<Snapshot>(p, Snapshot::default).ok())
            .map(|s| s.devices)
            .unwrap_or_default();
        Arc::new(Self {
            inner: RwLock::new(devices),
            snapshot_path,
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let devices = self.inner.read().clone();
        persist::save_atomic(path, &Snapshot { devices })
    }

    /// Applies an `announce` frame: replaces the device's tool set
    /// whole-cloth and bumps `last_announce`/`last_seen`.
    /// Returns `true` if this is the device's first-ever announce (callers
    /// use this to decide whether to mint a claim token and auto-seed
    /// projection defaults).
    pub fn upsert_announce(
        &self,
        device_id: &str,
        payload: &AnnouncePayload,
        protocol: Protocol,
    ) -> bool {
        let now = Utc::now();
        let mut map = self.inner.write();
        let is_new = !map.contains_key(device_id);
        let entry = map
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord {
                device_id: device_id.to_string(),
                name: payload.name.clone(),
                version: payload.version.clone(),
                tools: Vec::new(),
                last_announce: None,
                last_status: None,
                last_seen: None,
                protocol,
                secret_token: None,
            });
        entry.name = payload.name.clone();
        entry.version = payload.version.clone();
        entry.tools = payload.tools.clone();
        entry.protocol = protocol;
        entry.last_announce = Some(now);
        entry.last_seen = Some(now);
        is_new
    }

    /// Applies a `status` frame.
    pub fn update_status(&self, device_id: &str, payload: StatusPayload) {
        let now = Utc::now();
        let mut map = self.inner.write();
        if let Some(entry) = map.get_mut(device_id) {
            entry.last_status = Some(payload);
            entry.last_seen = Some(now);
        }
    }

    /// Synthesizes `status {online:false}` immediately on stream-connection
    /// close.
    pub fn mark_offline(&self, device_id: &str) {
        let mut map = self.inner.write();
        if let Some(entry) = map.get_mut(device_id) {
            entry.last_status = Some(StatusPayload {
                online: Some(false),
                ts: Some(Utc::now().format(STATUS_TS_FORMAT).to_string()),
                ..StatusPayload::default()
            });
        }
    }

    #[must_use]
    pub fn exists(&self, device_id: &str) -> bool {
        self.inner.read().contains_key(device_id)
    }

    /// Deep-copy snapshot read, so callers never hold a mutable alias into
    /// the registry.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.inner.read().get(device_id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<DeviceRecord> {
        self.inner.read().values().cloned().collect()
    }

    #[must_use]
    pub fn protocol_of(&self, device_id: &str) -> Option<Protocol> {
        self.inner.read().get(device_id).map(|d| d.protocol)
    }

    #[must_use]
    pub fn token_of(&self, device_id: &str) -> Option<String> {
        self.inner
            .read()
            .get(device_id)
            .and_then(|d| d.secret_token.clone())
    }

    /// Sets and persists a device's shared secret token.
    pub fn set_token(&self, device_id: &str, token: String) {
        {
            let mut map = self.inner.write();
            if let Some(entry) = map.get_mut(device_id) {
                entry.secret_token = Some(token);
            }
        }
        if let Err(e) = self.persist() {
            tracing::warn!(device_id, error = %e, "failed to persist device snapshot");
        }
    }
}

#[must_use]
pub fn default_snapshot_path() -> PathBuf {
    Path::new("config/devices.json").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_wire::ToolDescriptor;

    fn announce(tools: Vec<ToolDescriptor>) -> AnnouncePayload {
        AnnouncePayload {
            name: "Sensor 1".to_string(),
            version: "1".to_string(),
            tools,
        }
    }

    #[test]
    fn first_announce_creates_and_reports_new() {
        let reg = DeviceRegistry::new(None);
        let is_new = reg.upsert_announce("sensor01", &announce(vec![]), Protocol::Broker);
        assert!(is_new);
        let is_new_again = reg.upsert_announce("sensor01", &announce(vec![]), Protocol::Broker);
        assert!(!is_new_again);
    }

    #[test]
    fn announce_replaces_tools_whole_cloth() {
        let reg = DeviceRegistry::new(None);
        let tool = ToolDescriptor {
            name: "read".to_string(),
            description: "read".to_string(),
            parameters: serde_json::json!({"type":"object","properties":{},"required":[]}),
        };
        reg.upsert_announce("sensor01", &announce(vec![tool]), Protocol::Broker);
        reg.upsert_announce("sensor01", &announce(vec![]), Protocol::Broker);
        assert!(reg.get("sensor01").unwrap().tools.is_empty());
    }

    #[test]
    fn online_derivation_matches_90s_threshold() {
        let mut record = DeviceRecord {
            device_id: "d".to_string(),
            name: "d".to_string(),
            version: "1".to_string(),
            tools: vec![],
            last_announce: None,
            last_status: None,
            last_seen: None,
            protocol: Protocol::Broker,
            secret_token: None,
        };
        let now = Utc::now();
        record.last_status = Some(StatusPayload {
            ts: Some((now - chrono::Duration::seconds(10)).format(STATUS_TS_FORMAT).to_string()),
            ..StatusPayload::default()
        });
        assert!(record.is_online_at(now));

        record.last_status = Some(StatusPayload {
            ts: Some((now - chrono::Duration::seconds(91)).format(STATUS_TS_FORMAT).to_string()),
            ..StatusPayload::default()
        });
        assert!(!record.is_online_at(now));
    }

    #[test]
    fn unparseable_ts_is_offline() {
        let record = DeviceRecord {
            device_id: "d".to_string(),
            name: "d".to_string(),
            version: "1".to_string(),
            tools: vec![],
            last_announce: None,
            last_status: Some(StatusPayload {
                ts: Some("not-a-timestamp".to_string()),
                ..StatusPayload::default()
            }),
            last_seen: None,
            protocol: Protocol::Broker,
            secret_token: None,
        };
        assert!(!record.is_online());
    }

    #[test]
    fn mark_offline_on_disconnect() {
        let reg = DeviceRegistry::new(None);
        reg.upsert_announce("sensor01", &announce(vec![]), Protocol::Stream);
        reg.mark_offline("sensor01");
        assert!(!reg.get("sensor01").unwrap().is_online());
    }
}
