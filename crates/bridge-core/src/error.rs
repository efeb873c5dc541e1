//! Internal propagation errors. Kept separate from [`bridge_wire::ErrorCode`]
//! (the wire contract); this enum is for `?`-propagation inside Rust code
//! and is mapped to a wire `ErrorCode` at the boundary.

use bridge_wire::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("command timed out after {0}ms")]
    Timeout(u64),
    #[error("transport send failed: {0}")]
    SendFailed(String),
    #[error("device offline: {0}")]
    DeviceOffline(String),
    #[error("unknown tool '{tool}' on device '{device}'")]
    UnknownTool { device: String, tool: String },
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::UnknownDevice(_) => ErrorCode::UnknownDevice,
            BridgeError::Timeout(_) => ErrorCode::Timeout,
            BridgeError::SendFailed(_) => ErrorCode::SendFailed,
            BridgeError::DeviceOffline(_) => ErrorCode::DeviceOffline,
            BridgeError::UnknownTool { .. } => ErrorCode::UnknownTool,
            BridgeError::InvalidArgs(_) => ErrorCode::InvalidArgs,
            BridgeError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            BridgeError::Io(_) | BridgeError::Json(_) | BridgeError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    #[must_use]
    pub fn to_error_body(&self) -> bridge_wire::ErrorBody {
        bridge_wire::ErrorBody::new(self.code(), self.to_string())
    }
}
