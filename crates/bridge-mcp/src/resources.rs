//! Read-only MCP resources: JSON snapshots of registry/projection/routing
//! state plus the per-request asset cache, each addressed by its own
//! `bridge://` URI.

use crate::state::BridgeState;
use bridge_core::Protocol;
use rmcp::model::{RawResource, ReadResourceResult, Resource, ResourceContents};
use serde_json::{json, Value};

const DEVICES: &str = "bridge://devices";
const DEVICES_ALL: &str = "bridge://devices/all";
const PROJECTIONS: &str = "bridge://projections";
const PORTS: &str = "bridge://ports";
const ROUTING_MATRIX: &str = "bridge://routing-matrix";

fn resource(uri: &str, name: &str, description: &str) -> Resource {
    let mut raw = RawResource::new(uri, name);
    raw.description = Some(description.to_string());
    raw.mime_type = Some("application/json".to_string());
    raw.no_annotation()
}

/// The fixed set of resources this process exposes: device list/detail,
/// projections, ports, routing matrix, per-request asset. `device/{id}` and
/// `asset/{request_id}` are addressed dynamically and so are not
/// enumerated here.
#[must_use]
pub fn list_resources() -> Vec<Resource> {
    vec![
        resource(DEVICES, "devices", "Online devices only"),
        resource(DEVICES_ALL, "devices/all", "All known devices, online or not"),
        resource(PROJECTIONS, "projections", "Tool projection configuration"),
        resource(PORTS, "ports", "All announced device ports"),
        resource(ROUTING_MATRIX, "routing-matrix", "Port routing connections"),
    ]
}

fn device_json(device: &bridge_core::DeviceRecord) -> Value {
    json!({
        "device_id": device.device_id,
        "name": device.name,
        "version": device.version,
        "online": device.is_online(),
        "protocol": match device.protocol {
            Protocol::Broker => "broker",
            Protocol::Stream => "stream",
        },
        "tools": device.tools,
        "last_announce": device.last_announce,
        "last_status": device.last_status,
        "last_seen": device.last_seen,
    })
}

/// Reads one resource by URI, resolving the `device/{id}` and
/// `asset/{request_id}` templates inline when the URI isn't one of the
/// fixed resources.
pub fn read_resource(state: &BridgeState, uri: &str) -> Result<ReadResourceResult, String> {
    let value = match uri {
        DEVICES => json!({
            "devices": state.registry.list().into_iter().filter(|d| d.is_online()).map(|d| device_json(&d)).collect::<Vec<_>>(),
        }),
        DEVICES_ALL => json!({
            "devices": state.registry.list().iter().map(device_json).collect::<Vec<_>>(),
        }),
        PROJECTIONS => {
            let devices: Vec<Value> = state
                .registry
                .list()
                .into_iter()
                .map(|d| {
                    let proj = state.projection.get_device_projection(&d.device_id);
                    json!({ "device_id": d.device_id, "projection": proj })
                })
                .collect();
            json!({ "devices": devices })
        }
        PORTS => json!({
            "ports": state.ports.list_all().into_iter().map(|(device_id, p)| json!({
                "device_id": device_id,
                "name": p.name,
                "direction": p.direction,
                "data_type": p.data_type,
                "description": p.description,
            })).collect::<Vec<_>>(),
        }),
        ROUTING_MATRIX => json!({ "connections": state.matrix.list() }),
        other => return read_templated(state, other),
    };
    Ok(as_text_result(uri, value))
}

fn read_templated(state: &BridgeState, uri: &str) -> Result<ReadResourceResult, String> {
    if let Some(device_id) = uri.strip_prefix("bridge://device/") {
        let device = state
            .registry
            .get(device_id)
            .ok_or_else(|| format!("unknown device: {device_id}"))?;
        return Ok(as_text_result(uri, device_json(&device)));
    }
    if let Some(request_id) = uri.strip_prefix("bridge://asset/") {
        let payload = state
            .assets
            .get(request_id)
            .ok_or_else(|| format!("no asset recorded for request: {request_id}"))?;
        return Ok(as_text_result(uri, payload));
    }
    Err(format!("unknown resource: {uri}"))
}

fn as_text_result(uri: &str, value: Value) -> ReadResourceResult {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    ReadResourceResult {
        contents: vec![ResourceContents::TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text,
        }],
    }
}
