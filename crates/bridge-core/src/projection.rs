//! Projection config and the derived tool registry: the visibility/alias
//! layer that shapes which device tools show up externally, and under
//! what name.

use crate::error::Result;
use crate::persist;
use bridge_wire::ToolDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolProjection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceProjection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub device_alias: Option<String>,
    #[serde(default)]
    pub tools: HashMap<String, ToolProjection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalProjection {
    pub auto_enable_new_devices: bool,
    pub auto_enable_new_tools: bool,
}

impl Default for GlobalProjection {
    fn default() -> Self {
        Self {
            auto_enable_new_devices: true,
            auto_enable_new_tools: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ProjectionConfigFile {
    devices: HashMap<String, DeviceProjection>,
    global: GlobalProjection,
}

pub struct ProjectionStore {
    inner: RwLock<ProjectionConfigFile>,
    path: Option<PathBuf>,
}

impl ProjectionStore {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Arc<Self> {
        let file = path
            .as_deref()
            .and_then(|p| persist::load_or_default::<ProjectionConfigFile>(p, ProjectionConfigFile::default).ok())
            .unwrap_or_default();
        Arc::new(Self {
            inner: RwLock::new(file),
            path,
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let file = ProjectionConfigFile {
            devices: self.inner.read().devices.clone(),
            global: self.inner.read().global.clone(),
        };
        persist::save_atomic(path, &file)
    }

    /// Re-reads the backing JSON file from disk.
    pub fn reload(&self) {
        let Some(path) = &self.path else { return };
        match persist::load_or_default::<ProjectionConfigFile>(path, ProjectionConfigFile::default) {
            Ok(file) => *self.inner.write() = file,
            Err(e) => tracing::warn!(error = %e, "failed to reload projection config"),
        }
    }

    /// Auto-seeds a device's entry (and any of its tools not yet known)
    /// using current global defaults, the first time a device id is seen.
    pub fn auto_add_device(&self, device_id: &str, device_name: &str, tool_names: &[String]) {
        let mut changed = false;
        {
            let mut cfg = self.inner.write();
            let global = cfg.global.clone();
            let entry = cfg.devices.entry(device_id.to_string()).or_insert_with(|| {
                changed = true;
                DeviceProjection {
                    enabled: Some(global.auto_enable_new_devices),
                    device_alias: Some(device_name.to_string()),
                    tools: HashMap::new(),
                }
            });
            for name in tool_names {
                entry.tools.entry(name.clone()).or_insert_with(|| {
                    changed = true;
                    ToolProjection {
                        enabled: Some(global.auto_enable_new_tools),
                        alias: None,
                        description: None,
                    }
                });
            }
        }
        if changed {
            if let Err(e) = self.persist() {
                tracing::warn!(device_id, error = %e, "failed to persist projection config");
            }
        }
    }

    #[must_use]
    pub fn is_device_enabled(&self, device_id: &str) -> bool {
        let cfg = self.inner.read();
        cfg.devices
            .get(device_id)
            .and_then(|d| d.enabled)
            .unwrap_or(cfg.global.auto_enable_new_devices)
    }

    #[must_use]
    pub fn is_tool_enabled(&self, device_id: &str, tool_name: &str) -> bool {
        if !self.is_device_enabled(device_id) {
            return false;
        }
        let cfg = self.inner.read();
        cfg.devices
            .get(device_id)
            .and_then(|d| d.tools.get(tool_name))
            .and_then(|t| t.enabled)
            .unwrap_or(cfg.global.auto_enable_new_tools)
    }

    #[must_use]
    pub fn device_alias(&self, device_id: &str, device_name: &str) -> String {
        let cfg = self.inner.read();
        cfg.devices
            .get(device_id)
            .and_then(|d| d.device_alias.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| {
                if device_name.is_empty() {
                    device_id.to_string()
                } else {
                    device_name.to_string()
                }
            })
    }

    #[must_use]
    pub fn projected_name(&self, device_id: &str, tool_name: &str) -> String {
        let cfg = self.inner.read();
        cfg.devices
            .get(device_id)
            .and_then(|d| d.tools.get(tool_name))
            .and_then(|t| t.alias.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| tool_name.to_string())
    }

    #[must_use]
    pub fn tool_description(&self, device_id: &str, tool_name: &str, original: &str) -> String {
        let cfg = self.inner.read();
        cfg.devices
            .get(device_id)
            .and_then(|d| d.tools.get(tool_name))
            .and_then(|t| t.description.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| original.to_string())
    }

    #[must_use]
    pub fn get_device_projection(&self, device_id: &str) -> DeviceProjection {
        self.inner
            .read()
            .devices
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// A raw device tool exposed externally under its projected name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedTool {
    pub tool_key: String,
    pub device_id: String,
    pub original_name: String,
    pub projected_name: String,
    pub description: String,
    pub parameters: Value,
}

/// `tool_key -> ProjectedTool`, rebuilt per device on each announce or
/// projection reload.
pub struct ToolRegistry {
    inner: RwLock<HashMap<String, ProjectedTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
        })
    }

    /// Drops all entries for `device_id`, auto-seeds projection config for
    /// any newly seen tools, then rebuilds entries for every tool still
    /// enabled. A fresh announce drops all prior entries whose key ends
    /// with `_{device_id}` before emitting the new set.
    pub fn register_device_tools(
        &self,
        device_id: &str,
        device_name: &str,
        tools: &[ToolDescriptor],
        projection: &ProjectionStore,
    ) {
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        projection.auto_add_device(device_id, device_name, &names);

        let suffix = format!("_{device_id}");
        {
            let mut map = self.inner.write();
            map.retain(|k, _| !k.ends_with(&suffix));
        }

        if !projection.is_device_enabled(device_id) {
            return;
        }

        let mut fresh = Vec::new();
        for tool in tools {
            if !projection.is_tool_enabled(device_id, &tool.name) {
                continue;
            }
            let projected_name = projection.projected_name(device_id, &tool.name);
            let description = projection.tool_description(device_id, &tool.name, &tool.description);
            let tool_key = format!("{projected_name}_{device_id}");
            fresh.push(ProjectedTool {
                tool_key,
                device_id: device_id.to_string(),
                original_name: tool.name.clone(),
                projected_name,
                description,
                parameters: tool.parameters.clone(),
            });
        }

        let mut map = self.inner.write();
        for entry in fresh {
            if let Some(existing) = map.get(&entry.tool_key) {
                tracing::warn!(
                    tool_key = %entry.tool_key,
                    existing_device = %existing.device_id,
                    "tool_key collision on rebuild; overwriting"
                );
            }
            map.insert(entry.tool_key.clone(), entry);
        }
    }

    #[must_use]
    pub fn get(&self, tool_key: &str) -> Option<ProjectedTool> {
        self.inner.read().get(tool_key).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProjectedTool> {
        self.inner.read().values().cloned().collect()
    }

    /// Re-reads the projection JSON, clears the registry, and rebuilds
    /// entries for every device currently known.
    pub fn reload(
        &self,
        projection: &ProjectionStore,
        devices: &[(String, String, Vec<ToolDescriptor>)],
    ) {
        projection.reload();
        self.inner.write().clear();
        for (device_id, device_name, tools) in devices {
            self.register_device_tools(device_id, device_name, tools, projection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} desc"),
            parameters: serde_json::json!({"type":"object","properties":{},"required":[]}),
        }
    }

    #[test]
    fn auto_seeded_device_is_enabled_by_default() {
        let proj = ProjectionStore::new(None);
        proj.auto_add_device("d1", "Device 1", &["read".to_string()]);
        assert!(proj.is_device_enabled("d1"));
        assert!(proj.is_tool_enabled("d1", "read"));
    }

    #[test]
    fn device_alias_falls_back_to_name_then_id() {
        let proj = ProjectionStore::new(None);
        // No projection entry yet: falls back to the announced device name.
        assert_eq!(proj.device_alias("d1", "Device 1"), "Device 1");
        // Announced name empty too: falls back to the device id.
        assert_eq!(proj.device_alias("d1", ""), "d1");
    }

    #[test]
    fn register_and_rebuild_replaces_device_entries() {
        let proj = ProjectionStore::new(None);
        let registry = ToolRegistry::new();
        registry.register_device_tools("d1", "Device 1", &[tool("read"), tool("write")], &proj);
        assert_eq!(registry.list().len(), 2);

        registry.register_device_tools("d1", "Device 1", &[tool("read")], &proj);
        let keys: Vec<_> = registry.list().into_iter().map(|t| t.tool_key).collect();
        assert_eq!(keys, vec!["read_d1".to_string()]);
    }

    #[test]
    fn disabled_device_yields_no_projected_tools() {
        let proj = ProjectionStore::new(None);
        proj.auto_add_device("d1", "Device 1", &[]);
        // Flip the device off after seeding.
        {
            let mut cfg = proj.inner.write();
            cfg.devices.get_mut("d1").unwrap().enabled = Some(false);
        }
        let registry = ToolRegistry::new();
        registry.register_device_tools("d1", "Device 1", &[tool("read")], &proj);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn projection_idempotence() {
        let proj = ProjectionStore::new(None);
        let registry = ToolRegistry::new();
        let tools = [tool("read"), tool("write")];
        registry.register_device_tools("d1", "Device 1", &tools, &proj);
        let first: Vec<_> = {
            let mut v = registry.list();
            v.sort_by(|a, b| a.tool_key.cmp(&b.tool_key));
            v.into_iter().map(|t| t.tool_key).collect()
        };
        registry.register_device_tools("d1", "Device 1", &tools, &proj);
        let second: Vec<_> = {
            let mut v = registry.list();
            v.sort_by(|a, b| a.tool_key.cmp(&b.tool_key));
            v.into_iter().map(|t| t.tool_key).collect()
        };
        assert_eq!(first, second);
    }
}
