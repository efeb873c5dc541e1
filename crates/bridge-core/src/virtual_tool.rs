//! Virtual tool store and fan-out executor: composite external tools that
//! dispatch to several device tools in parallel and aggregate the results.

use crate::command::CommandRouter;
use crate::error::Result;
use crate::persist;
use crate::registry::{DeviceRecord, DeviceRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// One `(device_id, tool)` pair plus optional argument remapping.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Binding {
    pub device_id: String,
    pub tool: String,
    /// `target_param -> source_param`; when present, the call args are
    /// built by looking up each target's source key in the caller's args.
    #[serde(default)]
    pub args_map: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VirtualToolsGlobal {
    default_timeout_ms: u64,
}

impl Default for VirtualToolsGlobal {
    fn default() -> Self {
        // generous enough that a slow device doesn't starve the whole fan-out
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VirtualToolsFile {
    virtual_tools: HashMap<String, VirtualTool>,
    #[serde(default)]
    global: VirtualToolsGlobal,
}

pub struct VirtualToolStore {
    inner: parking_lot::RwLock<VirtualToolsFile>,
    path: Option<PathBuf>,
}

impl VirtualToolStore {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Arc<Self> {
        let file = path
            .as_deref()
            .and_then(|p| persist::load_or_default::<VirtualToolsFile>(p, VirtualToolsFile::default).ok())
            .unwrap_or_default();
        Arc::new(Self {
            inner: parking_lot::RwLock::new(file),
            path,
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let snapshot = VirtualToolsFile {
            virtual_tools: self.inner.read().virtual_tools.clone(),
            global: self.inner.read().global.clone(),
        };
        persist::save_atomic(path, &snapshot)
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.read().global.default_timeout_ms)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<VirtualTool> {
        self.inner.read().virtual_tools.get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<VirtualTool> {
        self.inner.read().virtual_tools.values().cloned().collect()
    }

    pub fn create(&self, tool: VirtualTool) {
        self.inner
            .write()
            .virtual_tools
            .insert(tool.name.clone(), tool);
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "failed to persist virtual tools");
        }
    }

    pub fn update(&self, name: &str, tool: VirtualTool) -> bool {
        let existed = self.inner.write().virtual_tools.insert(name.to_string(), tool).is_some();
        if existed {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist virtual tools");
            }
        }
        existed
    }

    pub fn delete(&self, name: &str) -> bool {
        let removed = self.inner.write().virtual_tools.remove(name).is_some();
        if removed {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist virtual tools");
            }
        }
        removed
    }

    pub fn reload(&self) {
        let Some(path) = &self.path else { return };
        match persist::load_or_default::<VirtualToolsFile>(path, VirtualToolsFile::default) {
            Ok(file) => *self.inner.write() = file,
            Err(e) => tracing::warn!(error = %e, "failed to reload virtual tools"),
        }
    }
}

/// Synthesizes a VirtualTool's external schema by unioning its bindings'
/// tool parameter schemas. Duplicate property names collapse to one entry
/// annotated with the list of originating tools.
#[must_use]
pub fn build_schema(vt: &VirtualTool, registry: &DeviceRegistry) -> Value {
    let mut properties: Map<String, Value> = Map::new();
    let mut originating: HashMap<String, Vec<String>> = HashMap::new();

    for binding in &vt.bindings {
        let Some(device) = registry.get(&binding.device_id) else {
            continue;
        };
        let Some(tool) = device.tool(&binding.tool) else {
            continue;
        };
        let Some(props) = tool.parameters.get("properties").and_then(Value::as_object) else {
            continue;
        };
        for (prop_name, prop_schema) in props {
            originating
                .entry(prop_name.clone())
                .or_default()
                .push(binding.tool.clone());
            properties
                .entry(prop_name.clone())
                .or_insert_with(|| prop_schema.clone());
        }
    }

    for (prop_name, tools) in &originating {
        if tools.len() <= 1 {
            continue;
        }
        if let Some(Value::Object(schema)) = properties.get_mut(prop_name) {
            let base = schema
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let annotated = format!("{base} (applies to all: {})", tools.join(", "));
            schema.insert("description".to_string(), Value::String(annotated));
        }
    }

    Value::Object(
        [
            ("type".to_string(), Value::String("object".to_string())),
            ("properties".to_string(), Value::Object(properties)),
            ("required".to_string(), Value::Array(Vec::new())),
        ]
        .into_iter()
        .collect(),
    )
}

fn compute_call_args(binding: &Binding, tool_params: Option<&Value>, args: &Value) -> Value {
    if let Some(map) = &binding.args_map {
        let mut out = Map::new();
        for (target_param, source_param) in map {
            if let Some(v) = args.get(source_param) {
                out.insert(target_param.clone(), v.clone());
            }
        }
        return Value::Object(out);
    }

    let Some(params) = tool_params else {
        // No schema available for this binding's tool: pass args unchanged.
        return args.clone();
    };
    let Some(allowed) = params.get("properties").and_then(Value::as_object) else {
        return args.clone();
    };
    let Some(args_obj) = args.as_object() else {
        return args.clone();
    };
    let mut out = Map::new();
    for (k, v) in args_obj {
        if allowed.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingResult {
    pub device_id: String,
    pub tool: String,
    pub ok: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub ok: bool,
    pub virtual_tool: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<BindingResult>,
}

/// Bounded worker pool (nominally 10 concurrent bindings) executing a
/// virtual tool's bindings in parallel, modeled with a
/// `tokio::sync::Semaphore`.
pub struct VirtualToolExecutor {
    registry: Arc<DeviceRegistry>,
    router: Arc<CommandRouter>,
    semaphore: Arc<Semaphore>,
}

const DEFAULT_POOL_SIZE: usize = 10;

impl VirtualToolExecutor {
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>, router: Arc<CommandRouter>) -> Self {
        Self {
            registry,
            router,
            semaphore: Arc::new(Semaphore::new(DEFAULT_POOL_SIZE)),
        }
    }

    /// Executes every binding of `vt` with `args`, skipping offline
    /// devices, and aggregates the result.
    pub async fn execute(&self, vt: &VirtualTool, args: Value, timeout: Duration) -> ExecutionSummary {
        let mut results: Vec<BindingResult> = Vec::new();
        let mut handles = Vec::new();

        for binding in &vt.bindings {
            let device = self.registry.get(&binding.device_id);
            let online = device.as_ref().is_some_and(DeviceRecord::is_online);
            if !online {
                results.push(BindingResult {
                    device_id: binding.device_id.clone(),
                    tool: binding.tool.clone(),
                    ok: false,
                    skipped: true,
                    error: Some("Device is offline".to_string()),
                    response: None,
                });
                continue;
            }
            let tool_params = device.as_ref().and_then(|d| d.tool(&binding.tool)).map(|t| t.parameters.clone());
            let call_args = compute_call_args(binding, tool_params.as_ref(), &args);

            let semaphore = self.semaphore.clone();
            let router = self.router.clone();
            let device_id = binding.device_id.clone();
            let tool = binding.tool.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("virtual tool semaphore is never closed");
                let (ok, response) = router.publish_cmd(&device_id, &tool, call_args, timeout).await;
                let error = if ok {
                    None
                } else {
                    response
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                BindingResult {
                    device_id,
                    tool,
                    ok,
                    skipped: false,
                    error,
                    response: Some(response),
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_error) => results.push(BindingResult {
                    device_id: String::new(),
                    tool: String::new(),
                    ok: false,
                    skipped: false,
                    error: Some(format!("binding task panicked: {join_error}")),
                    response: None,
                }),
            }
        }

        let total = vt.bindings.len();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let success = results.iter().filter(|r| r.ok).count();
        let failed = total.saturating_sub(success).saturating_sub(skipped);
        ExecutionSummary {
            ok: success == total.saturating_sub(skipped),
            virtual_tool: vt.name.clone(),
            total,
            success,
            failed,
            skipped,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandWaiter, OutboundSink};
    use crate::registry::Protocol;
    use async_trait::async_trait;
    use bridge_wire::{AnnouncePayload, StatusPayload, ToolDescriptor};
    use serde_json::json;

    /// Resolves every command mailbox it sees almost immediately, so a
    /// `publish_cmd` caller never actually waits out its timeout.
    struct RespondingSink {
        waiter: Arc<CommandWaiter>,
    }

    #[async_trait]
    impl OutboundSink for RespondingSink {
        async fn send_command(&self, _device_id: &str, _protocol: Protocol, frame: Value) -> bool {
            if let Some(request_id) = frame.get("request_id").and_then(Value::as_str) {
                let waiter = self.waiter.clone();
                let request_id = request_id.to_string();
                tokio::spawn(async move {
                    waiter.resolve(&request_id, json!({"ok": true}));
                });
            }
            true
        }
    }

    fn mark_online(registry: &DeviceRegistry, device_id: &str) {
        registry.update_status(
            device_id,
            StatusPayload {
                ts: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                ..StatusPayload::default()
            },
        );
    }

    #[test]
    fn schema_union_annotates_duplicate_properties() {
        let registry = DeviceRegistry::new(None);
        let say = ToolDescriptor {
            name: "say".to_string(),
            description: "say".to_string(),
            parameters: json!({"type":"object","properties":{"text":{"type":"string","description":"the text"}},"required":[]}),
        };
        registry.upsert_announce(
            "A",
            &AnnouncePayload { name: "A".to_string(), version: "1".to_string(), tools: vec![say.clone()] },
            Protocol::Broker,
        );
        registry.upsert_announce(
            "B",
            &AnnouncePayload { name: "B".to_string(), version: "1".to_string(), tools: vec![say] },
            Protocol::Broker,
        );
        let vt = VirtualTool {
            name: "greet_all".to_string(),
            description: String::new(),
            bindings: vec![
                Binding { device_id: "A".to_string(), tool: "say".to_string(), args_map: None },
                Binding { device_id: "B".to_string(), tool: "say".to_string(), args_map: None },
            ],
        };
        let schema = build_schema(&vt, &registry);
        let desc = schema["properties"]["text"]["description"].as_str().unwrap();
        assert!(desc.contains("applies to all"));
        assert!(desc.contains("say"));
    }

    #[tokio::test]
    async fn fan_out_skips_offline_binding_and_aggregates_result() {
        let registry = DeviceRegistry::new(None);
        let say = ToolDescriptor {
            name: "say".to_string(),
            description: "say".to_string(),
            parameters: json!({"type":"object","properties":{"text":{"type":"string"}},"required":[]}),
        };
        registry.upsert_announce(
            "A",
            &AnnouncePayload { name: "A".to_string(), version: "1".to_string(), tools: vec![say.clone()] },
            Protocol::Broker,
        );
        registry.upsert_announce(
            "B",
            &AnnouncePayload { name: "B".to_string(), version: "1".to_string(), tools: vec![say] },
            Protocol::Broker,
        );
        mark_online(&registry, "A");
        // B is left without a status frame: offline by default.

        let waiter = Arc::new(CommandWaiter::new());
        let sink = Arc::new(RespondingSink { waiter: waiter.clone() });
        let router = Arc::new(CommandRouter::new(registry.clone(), sink, waiter));
        let executor = VirtualToolExecutor::new(registry, router);

        let vt = VirtualTool {
            name: "greet_all".to_string(),
            description: String::new(),
            bindings: vec![
                Binding { device_id: "A".to_string(), tool: "say".to_string(), args_map: None },
                Binding { device_id: "B".to_string(), tool: "say".to_string(), args_map: None },
            ],
        };

        let summary = executor.execute(&vt, json!({"text": "hi"}), Duration::from_secs(1)).await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.ok);
    }
}
