//! Fan-out point for outbound frames: looks up a device's transport and
//! writes the frame the way that transport expects it — broker-rooted
//! devices get it published on the shared client, stream-rooted devices get
//! it written to their connection's line channel. Implements `bridge_core`'s
//! `OutboundSink`/`PortSink` traits so the command router and port router
//! never know which transport a device is actually bound to.

use async_trait::async_trait;
use bridge_core::command::OutboundSink;
use bridge_core::ports::PortSink;
use bridge_core::registry::Protocol;
use bridge_core::DeviceRegistry;
use bridge_wire::{Leaf, Topic};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One outbound line for a stream connection: a full JSON value, written
/// with a trailing `\n` by the connection's writer task.
pub type StreamLine = Value;

pub struct TransportHub {
    registry: Arc<DeviceRegistry>,
    broker: RwLock<Option<AsyncClient>>,
    stream_conns: RwLock<HashMap<String, mpsc::UnboundedSender<StreamLine>>>,
}

impl TransportHub {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            broker: RwLock::new(None),
            stream_conns: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_broker_client(&self, client: AsyncClient) {
        *self.broker.write() = Some(client);
    }

    /// Registers the writer handle for a freshly accepted stream
    /// connection, keyed by the device id bound to it on first `announce`.
    pub fn bind_stream(&self, device_id: &str, tx: mpsc::UnboundedSender<StreamLine>) {
        self.stream_conns.write().insert(device_id.to_string(), tx);
    }

    /// Drops a stream connection's writer handle on disconnect.
    pub fn unbind_stream(&self, device_id: &str) {
        self.stream_conns.write().remove(device_id);
    }

    async fn publish(&self, device_id: &str, protocol: Protocol, leaf: Leaf, payload: Value) -> bool {
        match protocol {
            Protocol::Broker => {
                let Some(client) = self.broker.read().clone() else {
                    tracing::warn!(device_id, "no broker client configured; dropping outbound frame");
                    return false;
                };
                let topic = Topic::new(device_id, leaf).to_string();
                let Ok(bytes) = serde_json::to_vec(&payload) else {
                    return false;
                };
                client.publish(topic, QoS::AtLeastOnce, false, bytes).await.is_ok()
            }
            Protocol::Stream => {
                let tx = self.stream_conns.read().get(device_id).cloned();
                let Some(tx) = tx else {
                    tracing::warn!(device_id, "no stream connection bound; dropping outbound frame");
                    return false;
                };
                let line = json!({
                    "topic": Topic::new(device_id, leaf).to_string(),
                    "payload": payload,
                });
                tx.send(line).is_ok()
            }
        }
    }

    /// Publishes a `claim` frame, `{"token": "..."}`, to a freshly
    /// announced device with no prior token on record.
    pub async fn publish_claim(&self, device_id: &str, protocol: Protocol, token: &str) -> bool {
        self.publish(device_id, protocol, Leaf::Claim, json!({ "token": token })).await
    }
}

#[async_trait]
impl OutboundSink for TransportHub {
    async fn send_command(&self, device_id: &str, protocol: Protocol, frame: Value) -> bool {
        self.publish(device_id, protocol, Leaf::Cmd, frame).await
    }
}

#[async_trait]
impl PortSink for TransportHub {
    /// Broker targets get the bare `{port, value}` body on
    /// `mcp/dev/{id}/ports/set`; stream targets get the same body with an
    /// explicit `type` discriminator since the stream carries no
    /// per-message topic outside the envelope.
    async fn send_port_set(&self, device_id: &str, port: &str, value: f64) -> bool {
        let Some(protocol) = self.registry.protocol_of(device_id) else {
            return false;
        };
        let payload = match protocol {
            Protocol::Broker => json!({ "port": port, "value": value }),
            Protocol::Stream => json!({ "type": "ports.set", "port": port, "value": value }),
        };
        self.publish(device_id, protocol, Leaf::PortsSet, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_port_set_carries_type_discriminator() {
        let registry = DeviceRegistry::new(None);
        registry.upsert_announce(
            "dev1",
            &bridge_wire::AnnouncePayload { name: "d".into(), version: "1".into(), tools: vec![] },
            Protocol::Stream,
        );
        let hub = TransportHub::new(registry);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.bind_stream("dev1", tx);

        assert!(hub.send_port_set("dev1", "temp", 21.5).await);
        let line = rx.try_recv().unwrap();
        assert_eq!(line["topic"], "mcp/dev/dev1/ports/set");
        assert_eq!(line["payload"]["type"], "ports.set");
        assert_eq!(line["payload"]["port"], "temp");
        assert_eq!(line["payload"]["value"], 21.5);
    }

    #[tokio::test]
    async fn unbound_stream_device_fails_send() {
        let registry = DeviceRegistry::new(None);
        registry.upsert_announce(
            "dev1",
            &bridge_wire::AnnouncePayload { name: "d".into(), version: "1".into(), tools: vec![] },
            Protocol::Stream,
        );
        let hub = TransportHub::new(registry);
        assert!(!hub.send_port_set("dev1", "temp", 1.0).await);
    }

    #[tokio::test]
    async fn unknown_device_port_set_fails() {
        let registry = DeviceRegistry::new(None);
        let hub = TransportHub::new(registry);
        assert!(!hub.send_port_set("ghost", "temp", 1.0).await);
    }
}
