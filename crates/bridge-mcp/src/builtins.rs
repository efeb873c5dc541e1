//! Built-in utility tools: a fallback generic dispatcher plus device/port/
//! routing introspection and mutation, always present regardless of which
//! devices have announced.

use crate::state::BridgeState;
use bridge_core::ports::{Transform, ThresholdMode};
use serde_json::{json, Value};

pub const NAMES: &[&str] = &[
    "invoke",
    "list_devices",
    "get_tools",
    "list_ports",
    "connect_ports",
    "disconnect_ports",
    "get_routing_matrix",
    "set_inport_value",
    "get_routing_stats",
];

#[must_use]
pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

fn require_str(args: &Value, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

fn require_f64(args: &Value, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

/// `invoke(device_id, tool, args?)` — the fallback generic dispatcher.
pub async fn invoke(state: &BridgeState, args: &Value) -> Result<Value, String> {
    let device_id = require_str(args, "device_id")?;
    let tool = require_str(args, "tool")?;
    let call_args = args.get("args").cloned().unwrap_or_else(|| json!({}));
    let (ok, response) = state
        .command_router
        .publish_cmd(&device_id, &tool, call_args, state.command_timeout)
        .await;
    if ok {
        Ok(response)
    } else {
        Err(response_error_message(&response))
    }
}

fn response_error_message(response: &Value) -> String {
    response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("command failed")
        .to_string()
}

/// `list_devices(show_offline?)`.
pub fn list_devices(state: &BridgeState, args: &Value) -> Value {
    let show_offline = args
        .get("show_offline")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let devices: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .filter(|d| show_offline || d.is_online())
        .map(|d| {
            json!({
                "device_id": d.device_id,
                "name": d.name,
                "version": d.version,
                "online": d.is_online(),
                "protocol": match d.protocol {
                    bridge_core::Protocol::Broker => "broker",
                    bridge_core::Protocol::Stream => "stream",
                },
                "tool_count": d.tools.len(),
            })
        })
        .collect();
    json!({ "devices": devices })
}

/// `get_tools(device_id)`.
pub fn get_tools(state: &BridgeState, args: &Value) -> Result<Value, String> {
    let device_id = require_str(args, "device_id")?;
    let device = state
        .registry
        .get(&device_id)
        .ok_or_else(|| format!("unknown device: {device_id}"))?;
    Ok(json!({ "device_id": device_id, "tools": device.tools }))
}

/// `list_ports()`.
pub fn list_ports(state: &BridgeState) -> Value {
    let ports: Vec<Value> = state
        .ports
        .list_all()
        .into_iter()
        .map(|(device_id, p)| {
            json!({
                "device_id": device_id,
                "name": p.name,
                "direction": p.direction,
                "data_type": p.data_type,
                "description": p.description,
            })
        })
        .collect();
    json!({ "ports": ports })
}

/// `connect_ports(source, target, scale?, offset?, threshold?, description?)`.
pub fn connect_ports(state: &BridgeState, args: &Value) -> Result<Value, String> {
    let source = require_str(args, "source")?;
    let target = require_str(args, "target")?;
    let description = args
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let threshold_mode = args
        .get("threshold_mode")
        .and_then(Value::as_str)
        .map(|m| match m {
            "below" => ThresholdMode::Below,
            "equal" => ThresholdMode::Equal,
            _ => ThresholdMode::Above,
        });
    let transform = Transform {
        scale: args.get("scale").and_then(Value::as_f64),
        offset: args.get("offset").and_then(Value::as_f64),
        min: args.get("min").and_then(Value::as_f64),
        max: args.get("max").and_then(Value::as_f64),
        threshold: args.get("threshold").and_then(Value::as_f64),
        threshold_mode,
        invert: args.get("invert").and_then(Value::as_bool),
        map_from: None,
        map_to: None,
    };
    let conn = state.matrix.connect(&source, &target, transform, description);
    Ok(serde_json::to_value(conn).map_err(|e| e.to_string())?)
}

/// `disconnect_ports(source, target)`.
pub fn disconnect_ports(state: &BridgeState, args: &Value) -> Result<Value, String> {
    let source = require_str(args, "source")?;
    let target = require_str(args, "target")?;
    let removed = state.matrix.disconnect(&source, &target);
    Ok(json!({ "removed": removed }))
}

/// `get_routing_matrix()`.
pub fn get_routing_matrix(state: &BridgeState) -> Value {
    json!({ "connections": state.matrix.list() })
}

/// `set_inport_value(device_id, port_name, value)`.
pub async fn set_inport_value(state: &BridgeState, args: &Value) -> Result<Value, String> {
    let device_id = require_str(args, "device_id")?;
    let port_name = require_str(args, "port_name")?;
    let value = require_f64(args, "value")?;
    let ok = state
        .port_router
        .set_inport_direct(&device_id, &port_name, value)
        .await;
    if ok {
        Ok(json!({ "ok": true }))
    } else {
        Err(format!("failed to deliver value to {device_id}/{port_name}"))
    }
}

/// `get_routing_stats()`.
pub fn get_routing_stats(state: &BridgeState) -> Value {
    let (no_op, success, dropped) = state.port_router.counters().snapshot();
    json!({ "no_op": no_op, "success": success, "dropped": dropped })
}
