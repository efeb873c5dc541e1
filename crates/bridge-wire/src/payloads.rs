//! Payload DTOs exchanged over both transports.

use crate::canonical::canonical_json;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Outport,
    Inport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusPayload {
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub uptime_ms: Option<u64>,
    #[serde(default)]
    pub rssi: Option<i64>,
    /// ISO-8601 UTC, `YYYY-MM-DDTHH:MM:SSZ` — see `bridge_core::registry` for
    /// the exact parse used to derive `online`.
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub kind: String,
    pub mime: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventsResult {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub assets: Option<Vec<Asset>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsPayload {
    pub request_id: String,
    #[serde(default)]
    pub result: Option<EventsResult>,
    #[serde(default)]
    pub error: Option<EventsError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsAnnouncePayload {
    #[serde(default)]
    pub outports: Vec<PortDescriptor>,
    #[serde(default)]
    pub inports: Vec<PortDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDataPayload {
    pub port: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSetPayload {
    pub port: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimPayload {
    pub token: String,
}

/// The unsigned command body, and the inner envelope once a timestamp is
/// added for signing. Field order matters: it is the order the canonical
/// signed string is built in.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub tool: String,
    pub args: Value,
    pub request_id: String,
    /// Present only when the device has a known secret token; absent, the
    /// envelope is sent as-is with no signature.
    pub timestamp: Option<i64>,
}

impl CommandEnvelope {
    /// Builds the envelope as a `serde_json::Value::Object` with fields in
    /// the fixed wire order `type, tool, args, request_id[, timestamp]`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String("device.command".to_string()));
        map.insert("tool".to_string(), Value::String(self.tool.clone()));
        map.insert("args".to_string(), self.args.clone());
        map.insert(
            "request_id".to_string(),
            Value::String(self.request_id.clone()),
        );
        if let Some(ts) = self.timestamp {
            map.insert("timestamp".to_string(), Value::from(ts));
        }
        Value::Object(map)
    }

    /// The canonical signed string for this envelope (only meaningful when
    /// `timestamp` is `Some`; callers sign this, not a re-serialized copy).
    #[must_use]
    pub fn canonical(&self) -> String {
        canonical_json(&self.to_value())
    }
}

/// A signed command frame: `{data: "<canonical JSON string>", signature: "<hex>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCommand {
    pub data: String,
    pub signature: String,
}

impl From<EventsError> for crate::error::ErrorBody {
    fn from(e: EventsError) -> Self {
        let code = match e.code.as_str() {
            "unknown_device" => ErrorCode::UnknownDevice,
            "timeout" => ErrorCode::Timeout,
            "send_failed" => ErrorCode::SendFailed,
            "device_offline" => ErrorCode::DeviceOffline,
            "unknown_tool" => ErrorCode::UnknownTool,
            "invalid_args" => ErrorCode::InvalidArgs,
            "config_invalid" => ErrorCode::ConfigInvalid,
            _ => ErrorCode::Internal,
        };
        crate::error::ErrorBody::new(code, e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_field_order_is_fixed_for_signing() {
        let env = CommandEnvelope {
            tool: "read".to_string(),
            args: json!({}),
            request_id: "rid".to_string(),
            timestamp: Some(1_700_000_000),
        };
        assert_eq!(
            env.canonical(),
            r#"{"type":"device.command","tool":"read","args":{},"request_id":"rid","timestamp":1700000000}"#
        );
    }

    #[test]
    fn unsigned_envelope_omits_timestamp() {
        let env = CommandEnvelope {
            tool: "read".to_string(),
            args: json!({}),
            request_id: "rid".to_string(),
            timestamp: None,
        };
        assert_eq!(
            env.canonical(),
            r#"{"type":"device.command","tool":"read","args":{},"request_id":"rid"}"#
        );
    }
}
