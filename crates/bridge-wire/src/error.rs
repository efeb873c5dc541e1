//! Wire-visible error taxonomy. This is deliberately a separate type from
//! any crate's internal `thiserror` enum: this one is a serialized contract
//! clients parse, not a Rust-side propagation type.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownDevice,
    Timeout,
    SendFailed,
    DeviceOffline,
    UnknownTool,
    InvalidArgs,
    ConfigInvalid,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownDevice => "unknown_device",
            ErrorCode::Timeout => "timeout",
            ErrorCode::SendFailed => "send_failed",
            ErrorCode::DeviceOffline => "device_offline",
            ErrorCode::UnknownTool => "unknown_tool",
            ErrorCode::InvalidArgs => "invalid_args",
            ErrorCode::ConfigInvalid => "config_invalid",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{error: {code, message}}` body, as returned by the command router,
/// the HTTP surface, and MCP tool-call error results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_snake_case_wire_string() {
        let v = serde_json::to_value(ErrorCode::UnknownDevice).unwrap();
        assert_eq!(v, serde_json::json!("unknown_device"));
    }
}
