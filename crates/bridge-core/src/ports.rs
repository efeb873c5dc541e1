//! Port store, routing matrix, transform pipeline, and port router.

use crate::error::Result;
use crate::persist;
use async_trait::async_trait;
use bridge_wire::PortDescriptor;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-device port descriptors as announced by `ports/announce`.
#[derive(Debug, Default)]
pub struct PortStore {
    inner: RwLock<HashMap<String, PortsForDevice>>,
}

#[derive(Debug, Clone, Default)]
struct PortsForDevice {
    outports: Vec<PortDescriptor>,
    inports: Vec<PortDescriptor>,
}

impl PortStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Applies a `ports/announce` frame: replaces both lists whole-cloth.
    pub fn upsert(&self, device_id: &str, outports: Vec<PortDescriptor>, inports: Vec<PortDescriptor>) {
        self.inner.write().insert(
            device_id.to_string(),
            PortsForDevice { outports, inports },
        );
    }

    #[must_use]
    pub fn outports(&self, device_id: &str) -> Vec<PortDescriptor> {
        self.inner
            .read()
            .get(device_id)
            .map(|p| p.outports.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn inports(&self, device_id: &str) -> Vec<PortDescriptor> {
        self.inner
            .read()
            .get(device_id)
            .map(|p| p.inports.clone())
            .unwrap_or_default()
    }

    /// All ports across all devices, as `(device_id, descriptor)` pairs —
    /// backs the `GET /ports` and `ports` resource surfaces.
    #[must_use]
    pub fn list_all(&self) -> Vec<(String, PortDescriptor)> {
        self.inner
            .read()
            .iter()
            .flat_map(|(device_id, ports)| {
                ports
                    .outports
                    .iter()
                    .chain(ports.inports.iter())
                    .map(|p| (device_id.clone(), p.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Threshold predicate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    Above,
    Below,
    Equal,
}

/// The ordered six-step value transform. Every field is optional; an
/// omitted field is an identity step, and an all-`None` transform is the
/// identity overall.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_mode: Option<ThresholdMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_from: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_to: Option<[f64; 2]>,
}

impl Transform {
    /// Applies the fixed six-step pipeline, in this exact order: scale,
    /// offset, clamp, threshold, invert, range-remap.
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(scale) = self.scale {
            v *= scale;
        }
        if let Some(offset) = self.offset {
            v += offset;
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            v = v.clamp(min, max);
        } else if let Some(min) = self.min {
            v = v.max(min);
        } else if let Some(max) = self.max {
            v = v.min(max);
        }
        if let Some(threshold) = self.threshold {
            let mode = self.threshold_mode.unwrap_or(ThresholdMode::Above);
            let predicate = match mode {
                ThresholdMode::Above => v > threshold,
                ThresholdMode::Below => v < threshold,
                ThresholdMode::Equal => v == threshold,
            };
            v = if predicate { 1.0 } else { 0.0 };
        }
        if self.invert.unwrap_or(false) {
            v = -v;
        }
        if let (Some([a, b]), Some([c, d])) = (self.map_from, self.map_to) {
            if a != b {
                v = c + (v - a) / (b - a) * (d - c);
            }
        }
        v
    }
}

/// A single routing edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub transform: Transform,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    #[must_use]
    pub fn edge_id(source: &str, target: &str) -> String {
        format!("{source}\u{2192}{target}")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConnectionsFile {
    connections: Vec<Connection>,
}

/// Ordered sequence of connections plus a `source_port_id -> indices`
/// lookup, rebuilt on every mutation.
#[derive(Default)]
pub struct RoutingMatrix {
    connections: RwLock<Vec<Connection>>,
    path: Option<PathBuf>,
}

impl RoutingMatrix {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Arc<Self> {
        let connections = path
            .as_deref()
            .and_then(|p| persist::load_or_default::<ConnectionsFile>(p, ConnectionsFile::default).ok())
            .map(|f| f.connections)
            .unwrap_or_default();
        Arc::new(Self {
            connections: RwLock::new(connections),
            path,
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let connections = self.connections.read().clone();
        persist::save_atomic(path, &ConnectionsFile { connections })
    }

    /// Inserts or replaces the edge for `(source, target)`. Two inserts of
    /// the same pair collapse to one edge rather than creating a duplicate.
    pub fn connect(
        &self,
        source: &str,
        target: &str,
        transform: Transform,
        description: String,
    ) -> Connection {
        let id = Connection::edge_id(source, target);
        let conn = Connection {
            id: id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            transform,
            enabled: true,
            description,
            created_at: Utc::now(),
        };
        {
            let mut conns = self.connections.write();
            if let Some(existing) = conns.iter_mut().find(|c| c.id == id) {
                *existing = conn.clone();
            } else {
                conns.push(conn.clone());
            }
        }
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "failed to persist routing connections");
        }
        conn
    }

    pub fn disconnect(&self, source: &str, target: &str) -> bool {
        let id = Connection::edge_id(source, target);
        let removed = {
            let mut conns = self.connections.write();
            let before = conns.len();
            conns.retain(|c| c.id != id);
            conns.len() != before
        };
        if removed {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist routing connections");
            }
        }
        removed
    }

    pub fn set_enabled(&self, connection_id: &str, enabled: bool) -> bool {
        let found = {
            let mut conns = self.connections.write();
            if let Some(c) = conns.iter_mut().find(|c| c.id == connection_id) {
                c.enabled = enabled;
                true
            } else {
                false
            }
        };
        if found {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist routing connections");
            }
        }
        found
    }

    #[must_use]
    pub fn list(&self) -> Vec<Connection> {
        self.connections.read().clone()
    }

    /// Enabled edges whose source matches `source_port_id`, in
    /// edge-insertion order.
    #[must_use]
    pub fn edges_from(&self, source_port_id: &str) -> Vec<Connection> {
        self.connections
            .read()
            .iter()
            .filter(|c| c.enabled && c.source == source_port_id)
            .cloned()
            .collect()
    }
}

/// Sends a routed value to a target device's inport over whichever
/// transport it is bound to. Implemented by `bridge-transport`, mirroring
/// `OutboundSink` in `command.rs`.
#[async_trait]
pub trait PortSink: Send + Sync {
    /// `true` on a best-effort successful publish; port routing never
    /// propagates transport failures.
    async fn send_port_set(&self, device_id: &str, port: &str, value: f64) -> bool;
}

#[derive(Default)]
pub struct RoutingCounters {
    pub no_op: AtomicU64,
    pub success: AtomicU64,
    pub dropped: AtomicU64,
}

impl RoutingCounters {
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.no_op.load(Ordering::Relaxed),
            self.success.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

pub struct PortRouter {
    matrix: Arc<RoutingMatrix>,
    sink: Arc<dyn PortSink>,
    counters: RoutingCounters,
}

impl PortRouter {
    #[must_use]
    pub fn new(matrix: Arc<RoutingMatrix>, sink: Arc<dyn PortSink>) -> Self {
        Self {
            matrix,
            sink,
            counters: RoutingCounters::default(),
        }
    }

    #[must_use]
    pub fn counters(&self) -> &RoutingCounters {
        &self.counters
    }

    /// Writes an inport value directly, bypassing the routing matrix: an
    /// operator or tool-consumer injects a value without an upstream
    /// `ports/data` frame driving it.
    pub async fn set_inport_direct(&self, device_id: &str, port: &str, value: f64) -> bool {
        self.sink.send_port_set(device_id, port, value).await
    }

    /// Routes one inbound `ports/data` value: look up the matching edges,
    /// apply each one's transform, and publish the result to its target.
    pub async fn route_inbound(&self, device_id: &str, port: &str, value: f64) {
        let source_port_id = format!("{device_id}/{port}");
        let edges = self.matrix.edges_from(&source_port_id);
        if edges.is_empty() {
            self.counters.no_op.fetch_add(1, Ordering::Relaxed);
            return;
        }
        for edge in edges {
            let transformed = edge.transform.apply(value);
            let Some((target_device, target_port)) = edge.target.split_once('/') else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            if self
                .sink
                .send_port_set(target_device, target_port, transformed)
                .await
            {
                self.counters.success.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn transform_pipeline_clears_threshold_when_below() {
        let t = Transform {
            scale: Some(2.0),
            offset: Some(1.0),
            threshold: Some(5.0),
            threshold_mode: Some(ThresholdMode::Above),
            ..Default::default()
        };
        // 1.5*2+1 = 4.0, not > 5 => 0.0
        assert_eq!(t.apply(1.5), 0.0);
    }

    #[test]
    fn transform_pipeline_fires_threshold_when_above() {
        let t = Transform {
            scale: Some(2.0),
            offset: Some(1.0),
            threshold: Some(5.0),
            threshold_mode: Some(ThresholdMode::Above),
            ..Default::default()
        };
        // 3.0*2+1 = 7.0, > 5 => 1.0
        assert_eq!(t.apply(3.0), 1.0);
    }

    #[test]
    fn identity_transform_is_noop() {
        let t = Transform::default();
        assert_eq!(t.apply(42.0), 42.0);
    }

    #[test]
    fn range_remap() {
        let t = Transform {
            map_from: Some([0.0, 10.0]),
            map_to: Some([0.0, 100.0]),
            ..Default::default()
        };
        assert_eq!(t.apply(5.0), 50.0);
    }

    #[test]
    fn invert_step() {
        let t = Transform {
            invert: Some(true),
            ..Default::default()
        };
        assert_eq!(t.apply(3.0), -3.0);
    }

    #[test]
    fn connecting_same_pair_twice_is_idempotent() {
        let matrix = RoutingMatrix::new(None);
        matrix.connect("A/x", "B/y", Transform::default(), String::new());
        matrix.connect("A/x", "B/y", Transform::default(), String::new());
        assert_eq!(matrix.list().len(), 1);
    }

    struct RecordingSink {
        calls: StdMutex<Vec<(String, String, f64)>>,
    }

    #[async_trait]
    impl PortSink for RecordingSink {
        async fn send_port_set(&self, device_id: &str, port: &str, value: f64) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push((device_id.to_string(), port.to_string(), value));
            true
        }
    }

    #[tokio::test]
    async fn routing_applies_transform_and_publishes_to_target() {
        let matrix = RoutingMatrix::new(None);
        matrix.connect(
            "A/x",
            "B/y",
            Transform {
                scale: Some(2.0),
                offset: Some(1.0),
                threshold: Some(5.0),
                threshold_mode: Some(ThresholdMode::Above),
                ..Default::default()
            },
            String::new(),
        );
        let sink = Arc::new(RecordingSink {
            calls: StdMutex::new(Vec::new()),
        });
        let router = PortRouter::new(matrix, sink.clone());

        router.route_inbound("A", "x", 1.5).await;
        router.route_inbound("A", "x", 3.0).await;

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls[0], ("B".to_string(), "y".to_string(), 0.0));
        assert_eq!(calls[1], ("B".to_string(), "y".to_string(), 1.0));
    }

    #[tokio::test]
    async fn no_edges_increments_noop_counter() {
        let matrix = RoutingMatrix::new(None);
        let sink = Arc::new(RecordingSink {
            calls: StdMutex::new(Vec::new()),
        });
        let router = PortRouter::new(matrix, sink);
        router.route_inbound("A", "x", 1.0).await;
        assert_eq!(router.counters().snapshot(), (1, 0, 0));
    }
}
