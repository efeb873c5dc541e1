//! Dynamic tool resolution: enumerates and dispatches built-ins, projected
//! device tools, and virtual tools as one flat namespace. No tool is
//! pre-registered anywhere — every `tools/list` and `tools/call` walks
//! current store state.

use crate::builtins;
use crate::state::BridgeState;
use async_trait::async_trait;
use bridge_core::virtual_tool::build_schema;
use rmcp::model::{Content, Tool};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn builtin_schema(name: &str) -> Value {
    match name {
        "invoke" => json!({
            "type": "object",
            "properties": {
                "device_id": {"type": "string"},
                "tool": {"type": "string"},
                "args": {"type": "object"},
            },
            "required": ["device_id", "tool"],
        }),
        "list_devices" => json!({
            "type": "object",
            "properties": {"show_offline": {"type": "boolean"}},
            "required": [],
        }),
        "get_tools" => json!({
            "type": "object",
            "properties": {"device_id": {"type": "string"}},
            "required": ["device_id"],
        }),
        "list_ports" | "get_routing_matrix" | "get_routing_stats" => json!({
            "type": "object", "properties": {}, "required": [],
        }),
        "connect_ports" => json!({
            "type": "object",
            "properties": {
                "source": {"type": "string"},
                "target": {"type": "string"},
                "scale": {"type": "number"},
                "offset": {"type": "number"},
                "min": {"type": "number"},
                "max": {"type": "number"},
                "threshold": {"type": "number"},
                "threshold_mode": {"type": "string", "enum": ["above", "below", "equal"]},
                "invert": {"type": "boolean"},
                "description": {"type": "string"},
            },
            "required": ["source", "target"],
        }),
        "disconnect_ports" => json!({
            "type": "object",
            "properties": {"source": {"type": "string"}, "target": {"type": "string"}},
            "required": ["source", "target"],
        }),
        "set_inport_value" => json!({
            "type": "object",
            "properties": {
                "device_id": {"type": "string"},
                "port_name": {"type": "string"},
                "value": {"type": "number"},
            },
            "required": ["device_id", "port_name", "value"],
        }),
        _ => json!({"type": "object", "properties": {}, "required": []}),
    }
}

fn to_schema_map(value: Value) -> Arc<Map<String, Value>> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(Map::new()),
    }
}

fn make_tool(name: String, description: String, schema: Value) -> Tool {
    Tool {
        name: name.into(),
        title: None,
        description: Some(description.into()),
        input_schema: to_schema_map(schema),
        output_schema: None,
        icons: None,
        annotations: None,
    }
}

/// Every tool currently visible: built-ins first, then projected device
/// tools, then virtual tools. Enumeration order isn't part of the wire
/// contract — this order is simply stable and easy to read in `tools/list`
/// dumps.
#[must_use]
pub fn list_tools(state: &BridgeState) -> Vec<Tool> {
    let mut tools = Vec::new();
    for name in builtins::NAMES {
        tools.push(make_tool(
            (*name).to_string(),
            format!("Built-in: {name}"),
            builtin_schema(name),
        ));
    }
    for projected in state.tool_registry.list() {
        tools.push(make_tool(
            projected.tool_key.clone(),
            projected.description.clone(),
            projected.parameters.clone(),
        ));
    }
    for vt in state.virtual_tools.list() {
        let schema = build_schema(&vt, &state.registry);
        tools.push(make_tool(vt.name.clone(), vt.description.clone(), schema));
    }
    tools
}

/// Outcome of dispatching one named tool call, independent of the MCP
/// wire types so it can also serve `bridge_reflex::ToolInvoker`.
pub enum CallOutcome {
    Ok(Value),
    Err(String),
    UnknownTool,
}

/// Resolves `name` against built-ins, then projected tools, then virtual
/// tools, and executes it.
pub async fn call_tool(state: &BridgeState, name: &str, args: Value) -> CallOutcome {
    if builtins::is_builtin(name) {
        return dispatch_builtin(state, name, &args).await;
    }
    if let Some(projected) = state.tool_registry.get(name) {
        return call_projected(state, &projected, args).await;
    }
    if let Some(vt) = state.virtual_tools.get(name) {
        let timeout = state.virtual_tools.default_timeout();
        let summary = state.virtual_executor.execute(&vt, args, timeout).await;
        return match serde_json::to_value(&summary) {
            Ok(v) => CallOutcome::Ok(v),
            Err(e) => CallOutcome::Err(e.to_string()),
        };
    }
    CallOutcome::UnknownTool
}

async fn dispatch_builtin(state: &BridgeState, name: &str, args: &Value) -> CallOutcome {
    let result = match name {
        "invoke" => builtins::invoke(state, args).await,
        "list_devices" => Ok(builtins::list_devices(state, args)),
        "get_tools" => builtins::get_tools(state, args),
        "list_ports" => Ok(builtins::list_ports(state)),
        "connect_ports" => builtins::connect_ports(state, args),
        "disconnect_ports" => builtins::disconnect_ports(state, args),
        "get_routing_matrix" => Ok(builtins::get_routing_matrix(state)),
        "set_inport_value" => builtins::set_inport_value(state, args).await,
        "get_routing_stats" => Ok(builtins::get_routing_stats(state)),
        other => return CallOutcome::Err(format!("unhandled builtin: {other}")),
    };
    match result {
        Ok(v) => CallOutcome::Ok(v),
        Err(e) => CallOutcome::Err(e),
    }
}

/// Calls a single projected device tool, short-circuiting with "Device is
/// offline" without touching the command router when the backing device
/// has gone stale.
async fn call_projected(
    state: &BridgeState,
    projected: &bridge_core::projection::ProjectedTool,
    args: Value,
) -> CallOutcome {
    let Some(device) = state.registry.get(&projected.device_id) else {
        return CallOutcome::Err("Device is offline".to_string());
    };
    if !device.is_online() {
        return CallOutcome::Err("Device is offline".to_string());
    }
    let (ok, response) = state
        .command_router
        .publish_cmd(
            &projected.device_id,
            &projected.original_name,
            args,
            state.command_timeout,
        )
        .await;
    if ok {
        CallOutcome::Ok(response)
    } else {
        let message = response
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("command failed")
            .to_string();
        CallOutcome::Err(message)
    }
}

/// Implements the reflex engine's tool-calling contract against this same
/// dynamic surface, so a reflex's `tool` or `llm` action reaches exactly
/// the tools an MCP client sees.
pub struct ReflexToolInvoker {
    state: BridgeState,
}

impl ReflexToolInvoker {
    #[must_use]
    pub fn new(state: BridgeState) -> Arc<Self> {
        Arc::new(Self { state })
    }
}

#[async_trait]
impl bridge_reflex::ToolInvoker for ReflexToolInvoker {
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, String> {
        match call_tool(&self.state, tool_name, args).await {
            CallOutcome::Ok(v) => Ok(v),
            CallOutcome::Err(e) => Err(e),
            CallOutcome::UnknownTool => Err(format!("unknown tool: {tool_name}")),
        }
    }

    fn known_tools(&self) -> Vec<String> {
        list_tools(&self.state)
            .into_iter()
            .map(|t| t.name.to_string())
            .collect()
    }
}

/// Renders a [`CallOutcome`] as the text-content `CallToolResult` shape:
/// `Content::text` plus a parallel `structured_content` value.
#[must_use]
pub fn outcome_to_call_result(outcome: CallOutcome) -> rmcp::model::CallToolResult {
    match outcome {
        CallOutcome::Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            rmcp::model::CallToolResult {
                content: vec![Content::text(text)],
                structured_content: Some(value),
                is_error: None,
                meta: None,
            }
        }
        CallOutcome::Err(message) => rmcp::model::CallToolResult {
            content: vec![Content::text(message)],
            structured_content: None,
            is_error: Some(true),
            meta: None,
        },
        CallOutcome::UnknownTool => rmcp::model::CallToolResult {
            content: vec![Content::text("unknown tool".to_string())],
            structured_content: None,
            is_error: Some(true),
            meta: None,
        },
    }
}
