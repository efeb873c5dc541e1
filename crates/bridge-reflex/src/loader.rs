//! Loads reflex rules from one-file-per-reflex YAML documents.

use crate::action::{Action, LlmAction, LlmProvider, ToolAction};
use crate::lifecycle::Lifecycle;
use crate::reflex::Reflex;
use crate::trigger::{IpcEventTrigger, ScheduleTrigger, StartupTrigger, Trigger};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TriggerConfig {
    Schedule(crate::trigger::ScheduleConfig),
    Startup(crate::trigger::StartupConfig),
    IpcEvent(crate::trigger::IpcConfig),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ActionConfig {
    Tool(crate::action::ToolActionConfig),
    Llm(crate::action::LlmActionConfig),
}

#[derive(Debug, Deserialize)]
struct ReflexFile {
    id: Option<String>,
    name: Option<String>,
    trigger: TriggerConfig,
    action: ActionConfig,
    #[serde(default)]
    tools: Vec<String>,
    lifecycle: Option<Lifecycle>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn build_trigger(config: TriggerConfig) -> Result<Arc<dyn Trigger>, String> {
    Ok(match config {
        TriggerConfig::Schedule(c) => Arc::new(ScheduleTrigger::new(c)?),
        TriggerConfig::Startup(c) => Arc::new(StartupTrigger::new(c)),
        TriggerConfig::IpcEvent(c) => Arc::new(IpcEventTrigger::new(c)),
    })
}

fn build_action(config: ActionConfig, llm_provider: Option<&Arc<dyn LlmProvider>>) -> Result<Arc<dyn Action>, String> {
    Ok(match config {
        ActionConfig::Tool(c) => Arc::new(ToolAction::new(c)),
        ActionConfig::Llm(c) => {
            let provider = llm_provider.cloned().ok_or_else(|| "llm action requires an LlmProvider to be configured".to_string())?;
            Arc::new(LlmAction::new(c, provider))
        }
    })
}

/// Parses one reflex YAML document. Missing `id` defaults to the filename
/// stem, missing `name` defaults to `id`, missing `lifecycle` defaults to
/// `persistent`.
pub fn parse_reflex_file(
    contents: &str,
    path: &Path,
    llm_provider: Option<&Arc<dyn LlmProvider>>,
) -> Result<Reflex, String> {
    let parsed: ReflexFile = serde_yaml::from_str(contents).map_err(|e| format!("{}: {e}", path.display()))?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("reflex").to_string();
    let id = parsed.id.unwrap_or_else(|| stem.clone());
    let name = parsed.name.unwrap_or_else(|| id.clone());
    let lifecycle = parsed.lifecycle.unwrap_or(Lifecycle {
        kind: crate::lifecycle::LifecycleType::Persistent,
        ttl_sec: None,
        max_runs: None,
        created_at: None,
        expire_at: None,
    });
    lifecycle.validate()?;

    if matches!(parsed.action, ActionConfig::Tool(_)) {
        ToolAction::validate_tools(&parsed.tools)?;
    }

    let trigger = build_trigger(parsed.trigger)?;
    let action = build_action(parsed.action, llm_provider)?;

    Ok(Reflex::new(
        id,
        name,
        trigger,
        action,
        parsed.tools,
        lifecycle,
        parsed.enabled,
        Some(path.display().to_string()),
    ))
}

/// Scans a directory for `*.yaml`/`*.yml` files and parses each into a
/// `Reflex`, skipping (and reporting) files that fail to parse rather than
/// aborting the whole load.
pub fn load_directory(dir: &Path, llm_provider: Option<&Arc<dyn LlmProvider>>) -> std::io::Result<(Vec<Reflex>, Vec<(PathBuf, String)>)> {
    let mut reflexes = Vec::new();
    let mut errors = Vec::new();
    if !dir.exists() {
        return Ok((reflexes, errors));
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e == "yaml" || e == "yml");
        if !path.is_file() || !is_yaml {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        match parse_reflex_file(&contents, &path, llm_provider) {
            Ok(reflex) => reflexes.push(reflex),
            Err(e) => errors.push((path, e)),
        }
    }
    Ok((reflexes, errors))
}

/// The set of reflex-rule filenames currently present in `dir`, used by the
/// engine's hot-reload tick to diff against a remembered set.
pub fn list_rule_filenames(dir: &Path) -> std::io::Result<std::collections::HashSet<String>> {
    let mut names = std::collections::HashSet::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_tool_action_reflex_with_defaults() {
        let yaml = r#"
trigger:
  type: startup
action:
  type: tool
  arguments:
    msg: "hello"
tools:
  - announce_all
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greet.yaml");
        std::fs::write(&path, yaml).unwrap();
        let reflex = parse_reflex_file(yaml, &path, None).unwrap();
        assert_eq!(reflex.id, "greet");
        assert_eq!(reflex.name, "greet");
        assert!(reflex.is_enabled());
        assert_eq!(reflex.trigger.trigger_type(), "startup");
    }

    #[test]
    fn tool_action_without_tools_fails_validation() {
        let yaml = r#"
trigger:
  type: startup
action:
  type: tool
  arguments: {}
"#;
        let path = PathBuf::from("bad.yaml");
        let result = parse_reflex_file(yaml, &path, None);
        assert!(result.is_err());
    }

    #[test]
    fn llm_action_without_provider_fails() {
        let yaml = r#"
trigger:
  type: startup
action:
  type: llm
  messages:
    - role: user
      content: "hi"
"#;
        let path = PathBuf::from("llm.yaml");
        let result = parse_reflex_file(yaml, &path, None);
        assert!(result.is_err());
    }

    #[test]
    fn load_directory_skips_non_yaml_and_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yaml"), "trigger:\n  type: startup\naction:\n  type: tool\n  arguments: {}\ntools: [a]\n").unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "not: valid: yaml: [").unwrap();
        let mut notes = std::fs::File::create(dir.path().join("README.md")).unwrap();
        writeln!(notes, "not a reflex").unwrap();
        let (reflexes, errors) = load_directory(dir.path(), None).unwrap();
        assert_eq!(reflexes.len(), 1);
        assert_eq!(errors.len(), 1);
    }
}
