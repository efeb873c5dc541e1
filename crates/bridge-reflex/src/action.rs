//! Action types a reflex can bind to a trigger: run one or more tools, or
//! hand the situation to an LLM that drives tool calls itself.

use crate::template::resolve_arguments;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Invokes a tool by name, abstracting over whether it resolves to a
/// projected device tool, a virtual tool, or a built-in. Implemented by the
/// `bridge` binary crate against `bridge-core`'s
/// `CommandRouter`/`VirtualToolExecutor`/`ToolRegistry` — defined here
/// rather than depended on from there so `bridge-reflex` never depends on
/// `bridge-mcp`.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, args: Value) -> Result<Value, String>;

    /// Tool names currently known, used for the periodic tool-refresh tick
    /// and reflex validation's "tool not found in registry" check.
    fn known_tools(&self) -> Vec<String>;
}

/// An LLM completion request/response pair, kept provider-agnostic so no
/// concrete vendor client is wired into this crate.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, String>;
}

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct LlmToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<LlmToolSpec>,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub enum LlmContentBlock {
    Text(String),
    ToolUse { name: String, input: Value },
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Vec<LlmContentBlock>,
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<String>,
}

pub struct ExecutionContext<'a> {
    pub event: &'a Value,
    pub state: &'a Value,
    pub trigger: &'a Value,
    pub tools: &'a [String],
    pub invoker: &'a dyn ToolInvoker,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn action_type(&self) -> &'static str;
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> ActionResult;
    fn to_value(&self) -> Value;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolActionConfig {
    #[serde(default)]
    pub arguments: Value,
}

/// Executes every tool bound to the reflex, in declaration order, with the
/// same templated arguments applied to each.
pub struct ToolAction {
    arguments: Value,
}

impl ToolAction {
    #[must_use]
    pub fn new(config: ToolActionConfig) -> Self {
        Self { arguments: config.arguments }
    }

    /// `ToolAction` requires at least one bound tool.
    pub fn validate_tools(tools: &[String]) -> Result<(), String> {
        if tools.is_empty() {
            Err("ToolAction requires at least 1 tool, but none provided".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Action for ToolAction {
    fn action_type(&self) -> &'static str {
        "tool"
    }

    async fn execute(&self, ctx: &ExecutionContext<'_>) -> ActionResult {
        if ctx.tools.is_empty() {
            let error = "ToolAction requires at least 1 tool, but none provided".to_string();
            return ActionResult { success: false, text: format!("Error: {error}"), tool_calls: vec![], error: Some(error) };
        }

        let mut calls = Vec::new();
        let mut all_success = true;
        let mut texts = Vec::new();

        for tool_name in ctx.tools {
            let resolved_args = resolve_arguments(&self.arguments, ctx.event, ctx.state, ctx.trigger);
            match ctx.invoker.invoke(tool_name, resolved_args.clone()).await {
                Ok(result) => {
                    let text = match &result {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    texts.push(format!("[{tool_name}] {text}"));
                    calls.push(ToolCallRecord { tool: tool_name.clone(), args: resolved_args, result: Some(result), error: None });
                }
                Err(e) => {
                    all_success = false;
                    texts.push(format!("[{tool_name}] Error: {e}"));
                    calls.push(ToolCallRecord { tool: tool_name.clone(), args: resolved_args, result: None, error: Some(e) });
                }
            }
        }

        ActionResult { success: all_success, text: texts.join("\n\n"), tool_calls: calls, error: None }
    }

    fn to_value(&self) -> Value {
        json!({ "type": "tool", "arguments": self.arguments })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessageConfig {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmActionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<LlmMessageConfig>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

/// Hands the situation to an LLM and lets it drive tool calls. `provider`
/// is any `LlmProvider`, so no concrete vendor client is coupled in here.
pub struct LlmAction {
    model: String,
    messages: Vec<LlmMessageConfig>,
    temperature: f64,
    provider: Arc<dyn LlmProvider>,
}

impl LlmAction {
    #[must_use]
    pub fn new(config: LlmActionConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self { model: config.model, messages: config.messages, temperature: config.temperature, provider }
    }

    /// LLMs are handed a shorter "pure" tool name rather than the full
    /// registry key, with the mapping back to the full key kept locally for
    /// the duration of one `execute`. A dotted name (`"calculator.add"`)
    /// keeps its last segment; a `"{tool}_{device_id}"` projected key keeps
    /// everything before the trailing device id instead, since the device
    /// id carries no information about what the tool does.
    fn pure_name(tool_name: &str) -> String {
        if let Some(idx) = tool_name.rfind('.') {
            tool_name[idx + 1..].to_string()
        } else if let Some(idx) = tool_name.rfind('_') {
            tool_name[..idx].to_string()
        } else {
            tool_name.to_string()
        }
    }
}

#[async_trait]
impl Action for LlmAction {
    fn action_type(&self) -> &'static str {
        "llm"
    }

    async fn execute(&self, ctx: &ExecutionContext<'_>) -> ActionResult {
        let mut name_mapping = std::collections::HashMap::new();
        let mut tool_specs = Vec::new();
        for full_name in ctx.tools {
            let pure = Self::pure_name(full_name);
            name_mapping.insert(pure.clone(), full_name.clone());
            tool_specs.push(LlmToolSpec {
                name: pure,
                description: format!("Execute {full_name}"),
                parameters: json!({ "type": "object", "properties": {}, "required": [] }),
            });
        }

        let mut system = None;
        let mut messages = Vec::new();
        for msg in &self.messages {
            let resolved = resolve_arguments(&json!(msg.content), ctx.event, ctx.state, ctx.trigger);
            let content = match resolved {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if msg.role == "system" {
                system = Some(content);
            } else {
                messages.push(LlmMessage { role: msg.role.clone(), content });
            }
        }
        if messages.is_empty() {
            messages.push(LlmMessage { role: "user".to_string(), content: "Please use the available tools as needed.".to_string() });
        }

        let request = LlmRequest { model: self.model.clone(), system, messages, tools: tool_specs, temperature: self.temperature };

        let response = match self.provider.complete(request).await {
            Ok(r) => r,
            Err(e) => return ActionResult { success: false, text: String::new(), tool_calls: vec![], error: Some(e) },
        };

        let mut calls = Vec::new();
        let mut text = String::new();
        for block in response.content {
            match block {
                LlmContentBlock::Text(t) => text = t,
                LlmContentBlock::ToolUse { name: pure_name, input } => {
                    let full_name = name_mapping.get(&pure_name).cloned().unwrap_or(pure_name);
                    match ctx.invoker.invoke(&full_name, input.clone()).await {
                        Ok(result) => calls.push(ToolCallRecord { tool: full_name, args: input, result: Some(result), error: None }),
                        Err(e) => calls.push(ToolCallRecord { tool: full_name, args: input, result: None, error: Some(e) }),
                    }
                }
            }
        }

        ActionResult { success: true, text, tool_calls: calls, error: None }
    }

    fn to_value(&self) -> Value {
        json!({
            "type": "llm",
            "model": self.model,
            "temperature": self.temperature,
            "messages": self.messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingInvoker {
        responses: parking_lot::Mutex<std::collections::HashMap<String, Result<Value, String>>>,
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn invoke(&self, tool_name: &str, _args: Value) -> Result<Value, String> {
            self.responses.lock().remove(tool_name).unwrap_or(Err("no such tool".to_string()))
        }

        fn known_tools(&self) -> Vec<String> {
            vec![]
        }
    }

    #[tokio::test]
    async fn tool_action_runs_every_bound_tool_sequentially() {
        let invoker = RecordingInvoker {
            responses: parking_lot::Mutex::new(
                [("read_d1".to_string(), Ok(json!({"v": 1}))), ("write_d1".to_string(), Ok(json!("ok")))]
                    .into_iter()
                    .collect(),
            ),
        };
        let action = ToolAction::new(ToolActionConfig { arguments: json!({"k": "v"}) });
        let tools = vec!["read_d1".to_string(), "write_d1".to_string()];
        let ctx = ExecutionContext { event: &json!({}), state: &json!({}), trigger: &json!({}), tools: &tools, invoker: &invoker };
        let result = action.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 2);
    }

    #[tokio::test]
    async fn tool_action_with_no_bound_tools_fails() {
        let invoker = RecordingInvoker { responses: parking_lot::Mutex::new(Default::default()) };
        let action = ToolAction::new(ToolActionConfig { arguments: json!({}) });
        let tools: Vec<String> = vec![];
        let ctx = ExecutionContext { event: &json!({}), state: &json!({}), trigger: &json!({}), tools: &tools, invoker: &invoker };
        let result = action.execute(&ctx).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn tool_action_partial_failure_is_reported() {
        let invoker = RecordingInvoker {
            responses: parking_lot::Mutex::new(
                [("ok_tool".to_string(), Ok(json!("fine"))), ("bad_tool".to_string(), Err("boom".to_string()))]
                    .into_iter()
                    .collect(),
            ),
        };
        let action = ToolAction::new(ToolActionConfig { arguments: json!({}) });
        let tools = vec!["ok_tool".to_string(), "bad_tool".to_string()];
        let ctx = ExecutionContext { event: &json!({}), state: &json!({}), trigger: &json!({}), tools: &tools, invoker: &invoker };
        let result = action.execute(&ctx).await;
        assert!(!result.success);
        assert_eq!(result.tool_calls.len(), 2);
    }

    #[test]
    fn pure_name_strips_device_suffix() {
        assert_eq!(LlmAction::pure_name("read_sensor01"), "read");
        assert_eq!(LlmAction::pure_name("calculator.add"), "add");
        assert_eq!(LlmAction::pure_name("plain"), "plain");
    }
}
