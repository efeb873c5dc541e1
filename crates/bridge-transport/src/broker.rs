//! Broker (MQTT-shaped pub/sub) transport adapter: a background task owns
//! the client connection and exposes a cheap `Clone`-able handle for
//! publishing, while the event loop feeds incoming publishes to the shared
//! protocol dispatch.

use crate::handler::ProtocolHandler;
use crate::hub::TransportHub;
use bridge_core::registry::Protocol;
use bridge_wire::Topic;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;

pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "bridge".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Subscribes to every `mcp/dev/+/#` topic and feeds incoming publishes
/// into `handler.dispatch`. Runs until the event loop errors or the
/// process shuts down; reconnect is handled by `rumqttc`'s event loop
/// itself re-dialing on the next `poll()` after a transient error.
pub async fn run_broker(config: BrokerConfig, handler: Arc<ProtocolHandler>, hub: Arc<TransportHub>) {
    let mut opts = MqttOptions::new(config.client_id, config.host.clone(), config.port);
    opts.set_keep_alive(config.keep_alive);

    let (client, mut eventloop) = AsyncClient::new(opts, 64);
    hub.set_broker_client(client.clone());

    if let Err(e) = client.subscribe("mcp/dev/+/#", QoS::AtLeastOnce).await {
        tracing::error!(error = %e, "failed to subscribe to device topics");
    }

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(topic) = Topic::parse(&publish.topic) else {
                    tracing::warn!(topic = %publish.topic, "ignoring publish on unrecognized topic");
                    continue;
                };
                let payload: serde_json::Value = match serde_json::from_slice(&publish.payload) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(topic = %publish.topic, error = %e, "ignoring publish with invalid JSON payload");
                        continue;
                    }
                };
                let outcome = handler.dispatch(&topic, payload, Protocol::Broker).await;
                tracing::debug!(?outcome, topic = %publish.topic, "broker frame dispatched");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "broker event loop error; retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
