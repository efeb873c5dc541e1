//! Transport-agnostic dispatch: both adapters hand raw `(topic, payload)`
//! pairs to [`ProtocolHandler::dispatch`], which is the single place that
//! updates the stores shared across transports. Dispatch returns a Rust enum
//! describing what actually happened, so callers can match on outcomes
//! without stringly-typed detail fields.

use crate::hub::TransportHub;
use bridge_core::registry::Protocol;
use bridge_core::{AssetCache, CommandWaiter, DeviceRegistry, PortRouter, ProjectionStore, ToolRegistry};
use bridge_core::ports::PortStore;
use bridge_wire::{AnnouncePayload, EventsPayload, Leaf, PortDataPayload, PortsAnnouncePayload, StatusPayload, Topic};
use serde_json::Value;
use std::sync::Arc;

/// What `dispatch` actually did with an inbound frame, for logging and
/// tests. Not part of the wire contract.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Announce { device_id: String, is_new: bool, claimed: bool },
    Status { device_id: String },
    Events { device_id: String, request_id: String, resolved: bool },
    PortsAnnounce { device_id: String },
    PortsData { device_id: String, port: String },
    Rejected { reason: String },
}

pub struct ProtocolHandler {
    registry: Arc<DeviceRegistry>,
    ports: Arc<PortStore>,
    port_router: Arc<PortRouter>,
    projection: Arc<ProjectionStore>,
    tool_registry: Arc<ToolRegistry>,
    waiter: Arc<CommandWaiter>,
    hub: Arc<TransportHub>,
    assets: Arc<AssetCache>,
}

impl ProtocolHandler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        ports: Arc<PortStore>,
        port_router: Arc<PortRouter>,
        projection: Arc<ProjectionStore>,
        tool_registry: Arc<ToolRegistry>,
        waiter: Arc<CommandWaiter>,
        hub: Arc<TransportHub>,
        assets: Arc<AssetCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            ports,
            port_router,
            projection,
            tool_registry,
            waiter,
            hub,
            assets,
        })
    }

    /// Dispatches one inbound frame by its topic leaf. `origin` is the
    /// transport the frame arrived on, used to record a device's transport
    /// on first announce.
    pub async fn dispatch(&self, topic: &Topic, payload: Value, origin: Protocol) -> DispatchOutcome {
        match topic.leaf {
            Leaf::Announce => self.handle_announce(&topic.device_id, payload, origin).await,
            Leaf::Status => self.handle_status(&topic.device_id, payload),
            Leaf::Events => self.handle_events(&topic.device_id, payload),
            Leaf::PortsAnnounce => self.handle_ports_announce(&topic.device_id, payload),
            Leaf::PortsData => self.handle_ports_data(&topic.device_id, payload).await,
            Leaf::PortsSet | Leaf::Cmd | Leaf::Claim => DispatchOutcome::Rejected {
                reason: format!("{} is an outbound-only leaf", topic.leaf),
            },
        }
    }

    async fn handle_announce(&self, device_id: &str, payload: Value, origin: Protocol) -> DispatchOutcome {
        let announce: AnnouncePayload = match serde_json::from_value(payload) {
            Ok(a) => a,
            Err(e) => return DispatchOutcome::Rejected { reason: format!("bad announce payload: {e}") },
        };
        let is_new = self.registry.upsert_announce(device_id, &announce, origin);
        self.tool_registry
            .register_device_tools(device_id, &announce.name, &announce.tools, &self.projection);

        // Mint and publish a claim token the first time a device is seen
        // with none on record yet.
        let mut claimed = false;
        if self.registry.token_of(device_id).is_none() {
            let token = bridge_core::command::mint_token();
            self.registry.set_token(device_id, token.clone());
            claimed = self.hub.publish_claim(device_id, origin, &token).await;
            if !claimed {
                tracing::warn!(device_id, "failed to publish claim token to newly announced device");
            }
        }

        DispatchOutcome::Announce { device_id: device_id.to_string(), is_new, claimed }
    }

    fn handle_status(&self, device_id: &str, payload: Value) -> DispatchOutcome {
        match serde_json::from_value::<StatusPayload>(payload) {
            Ok(status) => {
                self.registry.update_status(device_id, status);
                DispatchOutcome::Status { device_id: device_id.to_string() }
            }
            Err(e) => DispatchOutcome::Rejected { reason: format!("bad status payload: {e}") },
        }
    }

    fn handle_events(&self, device_id: &str, payload: Value) -> DispatchOutcome {
        let events: EventsPayload = match serde_json::from_value(payload) {
            Ok(e) => e,
            Err(e) => return DispatchOutcome::Rejected { reason: format!("bad events payload: {e}") },
        };
        let request_id = events.request_id.clone();
        let value = serde_json::to_value(&events).unwrap_or(Value::Null);
        self.assets.record(&request_id, value.clone());
        let resolved = self.waiter.resolve(&request_id, value);
        DispatchOutcome::Events { device_id: device_id.to_string(), request_id, resolved }
    }

    fn handle_ports_announce(&self, device_id: &str, payload: Value) -> DispatchOutcome {
        match serde_json::from_value::<PortsAnnouncePayload>(payload) {
            Ok(p) => {
                self.ports.upsert(device_id, p.outports, p.inports);
                DispatchOutcome::PortsAnnounce { device_id: device_id.to_string() }
            }
            Err(e) => DispatchOutcome::Rejected { reason: format!("bad ports/announce payload: {e}") },
        }
    }

    async fn handle_ports_data(&self, device_id: &str, payload: Value) -> DispatchOutcome {
        match serde_json::from_value::<PortDataPayload>(payload) {
            Ok(p) => {
                self.port_router.route_inbound(device_id, &p.port, p.value).await;
                DispatchOutcome::PortsData { device_id: device_id.to_string(), port: p.port }
            }
            Err(e) => DispatchOutcome::Rejected { reason: format!("bad ports/data payload: {e}") },
        }
    }

    /// Invoked by the stream adapter on connection close: synthesizes
    /// `status {online:false}` and fails any in-flight mailboxes addressed
    /// to that device (see `DESIGN.md` for why this is stricter than
    /// leaving them to time out).
    pub fn handle_disconnect(&self, device_id: &str) {
        self.registry.mark_offline(device_id);
        let error = serde_json::json!({
            "error": { "code": "send_failed", "message": "device disconnected" },
        });
        self.waiter.fail_pending_for_device(device_id, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::TransportHub;
    use bridge_core::ports::RoutingMatrix;
    use serde_json::json;

    fn handler() -> Arc<ProtocolHandler> {
        let registry = DeviceRegistry::new(None);
        let ports = PortStore::new();
        let matrix = RoutingMatrix::new(None);
        let hub = TransportHub::new(registry.clone());
        let port_router = Arc::new(PortRouter::new(matrix, hub.clone()));
        let projection = ProjectionStore::new(None);
        let tool_registry = ToolRegistry::new();
        let waiter = Arc::new(CommandWaiter::new());
        let assets = Arc::new(AssetCache::new());
        ProtocolHandler::new(registry, ports, port_router, projection, tool_registry, waiter, hub, assets)
    }

    #[tokio::test]
    async fn first_announce_mints_and_marks_new() {
        let h = handler();
        let topic = Topic::new("sensor01", Leaf::Announce);
        let outcome = h
            .dispatch(&topic, json!({"name": "Sensor", "version": "1", "tools": []}), Protocol::Broker)
            .await;
        match outcome {
            DispatchOutcome::Announce { is_new, .. } => assert!(is_new),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.registry.token_of("sensor01").is_some());
    }

    #[tokio::test]
    async fn second_announce_is_not_new() {
        let h = handler();
        let topic = Topic::new("sensor01", Leaf::Announce);
        let payload = json!({"name": "Sensor", "version": "1", "tools": []});
        h.dispatch(&topic, payload.clone(), Protocol::Broker).await;
        let outcome = h.dispatch(&topic, payload, Protocol::Broker).await;
        match outcome {
            DispatchOutcome::Announce { is_new, .. } => assert!(!is_new),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_resolves_registered_mailbox() {
        let h = handler();
        let rx = h.waiter.register("req-1", "sensor01");
        let topic = Topic::new("sensor01", Leaf::Events);
        let outcome = h
            .dispatch(&topic, json!({"request_id": "req-1", "result": {"text": "ok"}}), Protocol::Broker)
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Events { device_id: "sensor01".to_string(), request_id: "req-1".to_string(), resolved: true }
        );
        let value = rx.await.unwrap();
        assert_eq!(value["result"]["text"], "ok");
    }

    #[tokio::test]
    async fn unknown_leaf_direction_is_rejected() {
        let h = handler();
        let topic = Topic::new("sensor01", Leaf::Cmd);
        let outcome = h.dispatch(&topic, json!({}), Protocol::Broker).await;
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn disconnect_marks_offline_and_fails_mailboxes() {
        let h = handler();
        h.dispatch(
            &Topic::new("sensor01", Leaf::Announce),
            json!({"name": "Sensor", "version": "1", "tools": []}),
            Protocol::Stream,
        )
        .await;
        h.dispatch(
            &Topic::new("sensor01", Leaf::Status),
            json!({"online": true, "ts": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()}),
            Protocol::Stream,
        )
        .await;
        let rx = h.waiter.register("req-2", "sensor01");
        h.handle_disconnect("sensor01");
        assert!(!h.registry.get("sensor01").unwrap().is_online());
        let value = rx.await.unwrap();
        assert_eq!(value["error"]["code"], "send_failed");
    }
}
