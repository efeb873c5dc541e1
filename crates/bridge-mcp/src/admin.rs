//! Admin REST surface: a router-of-handlers axum app exposing this
//! process's device/port/virtual-tool state, with errors rendered as
//! `(StatusCode, message)` tuples via `IntoResponse`.

use crate::state::BridgeState;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use bridge_core::ports::{Transform, ThresholdMode};
use bridge_core::virtual_tool::VirtualTool;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/ports", get(list_ports))
        .route("/routing", get(get_routing))
        .route("/routing/connections", get(list_connections))
        .route("/routing/connect", post(connect))
        .route("/routing/disconnect", post(disconnect))
        .route("/routing/connection/{id}", post(set_connection_enabled))
        .route(
            "/virtual-tools",
            get(list_virtual_tools).post(create_virtual_tool),
        )
        .route(
            "/virtual-tools/{name}",
            get(get_virtual_tool)
                .put(update_virtual_tool)
                .delete(delete_virtual_tool),
        )
        .route("/management/reload", post(reload))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}

async fn list_devices(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(json!({ "devices": state.registry.list() }))
}

async fn get_device(State(state): State<BridgeState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(device) => Json(device).into_response(),
        None => (StatusCode::NOT_FOUND, "device not found").into_response(),
    }
}

async fn list_ports(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(json!({ "ports": state.ports.list_all() }))
}

async fn get_routing(State(state): State<BridgeState>) -> impl IntoResponse {
    let (no_op, success, dropped) = state.port_router.counters().snapshot();
    Json(json!({
        "connections": state.matrix.list(),
        "stats": { "no_op": no_op, "success": success, "dropped": dropped },
    }))
}

async fn list_connections(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(state.matrix.list())
}

#[derive(Deserialize)]
struct ConnectRequest {
    source: String,
    target: String,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    threshold_mode: Option<String>,
    #[serde(default)]
    invert: Option<bool>,
    #[serde(default)]
    description: String,
}

async fn connect(State(state): State<BridgeState>, Json(req): Json<ConnectRequest>) -> impl IntoResponse {
    let threshold_mode = req.threshold_mode.map(|m| match m.as_str() {
        "below" => ThresholdMode::Below,
        "equal" => ThresholdMode::Equal,
        _ => ThresholdMode::Above,
    });
    let transform = Transform {
        scale: req.scale,
        offset: req.offset,
        min: req.min,
        max: req.max,
        threshold: req.threshold,
        threshold_mode,
        invert: req.invert,
        map_from: None,
        map_to: None,
    };
    let conn = state.matrix.connect(&req.source, &req.target, transform, req.description);
    (StatusCode::CREATED, Json(conn)).into_response()
}

#[derive(Deserialize)]
struct DisconnectRequest {
    source: String,
    target: String,
}

async fn disconnect(
    State(state): State<BridgeState>,
    Json(req): Json<DisconnectRequest>,
) -> impl IntoResponse {
    if state.matrix.disconnect(&req.source, &req.target) {
        Json(OkResponse { ok: true }).into_response()
    } else {
        (StatusCode::NOT_FOUND, "connection not found").into_response()
    }
}

#[derive(Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

async fn set_connection_enabled(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> impl IntoResponse {
    if state.matrix.set_enabled(&id, req.enabled) {
        Json(OkResponse { ok: true }).into_response()
    } else {
        (StatusCode::NOT_FOUND, "connection not found").into_response()
    }
}

async fn list_virtual_tools(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(state.virtual_tools.list())
}

async fn get_virtual_tool(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.virtual_tools.get(&name) {
        Some(vt) => Json(vt).into_response(),
        None => (StatusCode::NOT_FOUND, "virtual tool not found").into_response(),
    }
}

async fn create_virtual_tool(
    State(state): State<BridgeState>,
    Json(vt): Json<VirtualTool>,
) -> impl IntoResponse {
    state.virtual_tools.create(vt);
    (StatusCode::CREATED, Json(OkResponse { ok: true })).into_response()
}

async fn update_virtual_tool(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
    Json(vt): Json<VirtualTool>,
) -> impl IntoResponse {
    if state.virtual_tools.update(&name, vt) {
        Json(OkResponse { ok: true }).into_response()
    } else {
        (StatusCode::NOT_FOUND, "virtual tool not found").into_response()
    }
}

async fn delete_virtual_tool(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.virtual_tools.delete(&name) {
        Json(OkResponse { ok: true }).into_response()
    } else {
        (StatusCode::NOT_FOUND, "virtual tool not found").into_response()
    }
}

/// `POST /management/reload`: re-reads projection config and virtual tools
/// from disk, then rebuilds the derived tool registry for every known
/// device.
async fn reload(State(state): State<BridgeState>) -> impl IntoResponse {
    let devices: Vec<(String, String, Vec<bridge_wire::ToolDescriptor>)> = state
        .registry
        .list()
        .into_iter()
        .map(|d| (d.device_id, d.name, d.tools))
        .collect();
    state.tool_registry.reload(&state.projection, &devices);
    state.virtual_tools.reload();
    Json(OkResponse { ok: true })
}
