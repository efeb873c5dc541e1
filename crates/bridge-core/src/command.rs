//! Command router: request/response correlation over an otherwise
//! fire-and-forget transport.

use crate::registry::{DeviceRegistry, Protocol};
use async_trait::async_trait;
use bridge_wire::{CommandEnvelope, ErrorCode, SignedCommand};
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default `publish_cmd` timeout when the caller does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends an already-built outbound frame over whichever transport a device
/// is bound to. Implemented by `bridge-transport`; defined here (rather
/// than depended on from there) so `bridge-core` never depends on the
/// transport crate.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Returns `true` if the frame was handed off to the transport
    /// successfully; `false` on any send failure (closed socket, publish
    /// error, unknown connection).
    async fn send_command(&self, device_id: &str, protocol: Protocol, frame: Value) -> bool;
}

struct WaiterInner {
    mailboxes: HashMap<String, oneshot::Sender<Value>>,
    by_device: HashMap<String, HashSet<String>>,
}

/// Single-slot, per-request mailboxes correlating `events` frames back to
/// their `publish_cmd` caller. Built on `tokio::sync::oneshot` — a channel
/// that can only ever be sent on once is a direct fit for a mailbox that
/// resolves at most one time.
pub struct CommandWaiter {
    inner: Mutex<WaiterInner>,
}

impl Default for CommandWaiter {
    fn default() -> Self {
        Self {
            inner: Mutex::new(WaiterInner {
                mailboxes: HashMap::new(),
                by_device: HashMap::new(),
            }),
        }
    }
}

impl CommandWaiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh single-slot mailbox for `request_id`, scoped to
    /// `device_id` for bulk failure on disconnect. Public so transport
    /// adapters and tests can register/resolve mailboxes directly without
    /// going through `CommandRouter::publish_cmd`.
    pub fn register(&self, request_id: &str, device_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        inner.mailboxes.insert(request_id.to_string(), tx);
        inner
            .by_device
            .entry(device_id.to_string())
            .or_default()
            .insert(request_id.to_string());
        rx
    }

    /// Resolves the mailbox for `request_id`, if one is still pending.
    /// A mailbox resolved more than once is a no-op on the second call —
    /// the entry was already removed on first resolve.
    pub fn resolve(&self, request_id: &str, value: Value) -> bool {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.mailboxes.remove(request_id) else {
            return false;
        };
        for ids in inner.by_device.values_mut() {
            ids.remove(request_id);
        }
        let _ = tx.send(value);
        true
    }

    fn remove(&self, request_id: &str) {
        let mut inner = self.inner.lock();
        inner.mailboxes.remove(request_id);
        for ids in inner.by_device.values_mut() {
            ids.remove(request_id);
        }
    }

    /// Proactively fails every in-flight mailbox addressed to `device_id`,
    /// invoked on stream-transport disconnect rather than leaving callers
    /// to time out (see `DESIGN.md` for why this is the stricter of the
    /// two disconnect behaviors this router could implement).
    pub fn fail_pending_for_device(&self, device_id: &str, error: Value) {
        let mut inner = self.inner.lock();
        let Some(ids) = inner.by_device.remove(device_id) else {
            return;
        };
        for id in ids {
            if let Some(tx) = inner.mailboxes.remove(&id) {
                let _ = tx.send(error.clone());
            }
        }
    }
}

/// Generates a 32-hex-character request id.
#[must_use]
pub fn generate_request_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// Mints a 32-character alphanumeric device token.
#[must_use]
pub fn mint_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Normalizes the three accepted `args` shapes: a JSON object is passed
/// through; a separator-joined string (`,`, `&`, or `:`) is parsed into a
/// flat object; an object with the single key `kwargs` is unwrapped to its
/// value.
#[must_use]
pub fn normalize_args(args: Value) -> Value {
    match args {
        Value::String(s) => parse_args_string(&s),
        Value::Object(ref map) if map.len() == 1 && map.contains_key("kwargs") => {
            map.get("kwargs").cloned().unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_args_string(s: &str) -> Value {
    let sep = if s.contains(',') {
        ','
    } else if s.contains('&') {
        '&'
    } else {
        ','
    };
    let mut map = Map::new();
    for part in s.split(sep) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let pair = part.split_once('=').or_else(|| part.split_once(':'));
        if let Some((k, v)) = pair {
            map.insert(k.trim().to_string(), Value::String(v.trim().to_string()));
        }
    }
    Value::Object(map)
}

fn error_value(code: ErrorCode, message: impl Into<String>, request_id: &str) -> Value {
    json!({
        "error": { "code": code.as_str(), "message": message.into() },
        "request_id": request_id,
    })
}

pub struct CommandRouter {
    registry: Arc<DeviceRegistry>,
    sink: Arc<dyn OutboundSink>,
    waiter: Arc<CommandWaiter>,
}

impl CommandRouter {
    #[must_use]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sink: Arc<dyn OutboundSink>,
        waiter: Arc<CommandWaiter>,
    ) -> Self {
        Self {
            registry,
            sink,
            waiter,
        }
    }

    #[must_use]
    pub fn waiter(&self) -> &Arc<CommandWaiter> {
        &self.waiter
    }

    /// `publish_cmd(device_id, tool, args, timeout) -> (ok, response_or_error)`:
    /// allocate a request id, sign the body if the device has a token,
    /// register a mailbox, hand the frame to the transport, and wait.
    pub async fn publish_cmd(
        &self,
        device_id: &str,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> (bool, Value) {
        let Some(protocol) = self.registry.protocol_of(device_id) else {
            return (
                false,
                error_value(ErrorCode::UnknownDevice, format!("unknown device: {device_id}"), ""),
            );
        };

        let request_id = generate_request_id();
        let normalized_args = normalize_args(args);
        let token = self.registry.token_of(device_id);

        let envelope = CommandEnvelope {
            tool: tool.to_string(),
            args: normalized_args,
            request_id: request_id.clone(),
            timestamp: token.as_ref().map(|_| chrono::Utc::now().timestamp()),
        };

        let frame = if let Some(token) = &token {
            let data = envelope.canonical();
            let signature = bridge_wire::signing::sign(token, &data);
            serde_json::to_value(SignedCommand { data, signature }).expect("SignedCommand serializes")
        } else {
            envelope.to_value()
        };

        let rx = self.waiter.register(&request_id, device_id);

        if !self.sink.send_command(device_id, protocol, frame).await {
            self.waiter.remove(&request_id);
            return (
                false,
                error_value(ErrorCode::SendFailed, "transport send failed", &request_id),
            );
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => (true, value),
            Ok(Err(_)) => (
                false,
                error_value(ErrorCode::SendFailed, "mailbox dropped without resolution", &request_id),
            ),
            Err(_elapsed) => {
                self.waiter.remove(&request_id);
                (
                    false,
                    error_value(ErrorCode::Timeout, "no response within timeout", &request_id),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Protocol;
    use bridge_wire::AnnouncePayload;

    struct RecordingSink {
        should_succeed: bool,
        sent: Arc<Mutex<Option<Value>>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send_command(&self, _device_id: &str, _protocol: Protocol, frame: Value) -> bool {
            *self.sent.lock() = Some(frame);
            self.should_succeed
        }
    }

    fn registry_with_device(device_id: &str, token: Option<&str>) -> Arc<DeviceRegistry> {
        let reg = DeviceRegistry::new(None);
        reg.upsert_announce(
            device_id,
            &AnnouncePayload {
                name: "n".to_string(),
                version: "1".to_string(),
                tools: vec![],
            },
            Protocol::Broker,
        );
        if let Some(t) = token {
            reg.set_token(device_id, t.to_string());
        }
        reg
    }

    #[tokio::test]
    async fn unknown_device_fails_fast() {
        let reg = DeviceRegistry::new(None);
        let sink = Arc::new(RecordingSink {
            should_succeed: true,
            sent: Arc::new(Mutex::new(None)),
        });
        let router = CommandRouter::new(reg, sink, Arc::new(CommandWaiter::new()));
        let (ok, resp) = router
            .publish_cmd("nope", "read", json!({}), Duration::from_millis(50))
            .await;
        assert!(!ok);
        assert_eq!(resp["error"]["code"], "unknown_device");
    }

    #[tokio::test]
    async fn timeout_when_no_event_arrives() {
        let reg = registry_with_device("sensor01", None);
        let sink = Arc::new(RecordingSink {
            should_succeed: true,
            sent: Arc::new(Mutex::new(None)),
        });
        let router = CommandRouter::new(reg, sink, Arc::new(CommandWaiter::new()));
        let (ok, resp) = router
            .publish_cmd("sensor01", "read", json!({}), Duration::from_millis(50))
            .await;
        assert!(!ok);
        assert_eq!(resp["error"]["code"], "timeout");
    }

    #[tokio::test]
    async fn send_failure_is_reported() {
        let reg = registry_with_device("sensor01", None);
        let sink = Arc::new(RecordingSink {
            should_succeed: false,
            sent: Arc::new(Mutex::new(None)),
        });
        let router = CommandRouter::new(reg, sink, Arc::new(CommandWaiter::new()));
        let (ok, resp) = router
            .publish_cmd("sensor01", "read", json!({}), Duration::from_millis(50))
            .await;
        assert!(!ok);
        assert_eq!(resp["error"]["code"], "send_failed");
    }

    #[tokio::test]
    async fn signed_command_has_data_and_signature_fields() {
        let reg = registry_with_device("sensor01", Some("topsecret"));
        let sent = Arc::new(Mutex::new(None));
        let sink = Arc::new(RecordingSink {
            should_succeed: true,
            sent: sent.clone(),
        });
        let router = CommandRouter::new(reg, sink, Arc::new(CommandWaiter::new()));

        let (_ok, _resp) = router
            .publish_cmd("sensor01", "read", json!({}), Duration::from_millis(20))
            .await;

        let frame = sent.lock().clone().expect("frame captured");
        assert!(frame.get("data").is_some());
        assert!(frame.get("signature").is_some());
        let data = frame["data"].as_str().unwrap();
        assert!(data.starts_with(r#"{"type":"device.command","tool":"read","args":{}"#));
    }

    #[test]
    fn normalize_args_parses_comma_separated_string() {
        let v = normalize_args(Value::String("a=1,b=2".to_string()));
        assert_eq!(v["a"], "1");
        assert_eq!(v["b"], "2");
    }

    #[test]
    fn normalize_args_parses_ampersand_separated_string() {
        let v = normalize_args(Value::String("a=1&b=2".to_string()));
        assert_eq!(v["a"], "1");
        assert_eq!(v["b"], "2");
    }

    #[test]
    fn normalize_args_unwraps_kwargs() {
        let v = normalize_args(json!({"kwargs": {"x": 1}}));
        assert_eq!(v, json!({"x": 1}));
    }

    #[test]
    fn normalize_args_passes_object_through() {
        let v = normalize_args(json!({"a": 1}));
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn request_ids_are_32_hex_chars() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn mailbox_resolves_at_most_once() {
        let waiter = CommandWaiter::new();
        let _rx = waiter.register("rid", "dev");
        assert!(waiter.resolve("rid", json!({"a": 1})));
        assert!(!waiter.resolve("rid", json!({"a": 2})));
    }

    #[test]
    fn fail_pending_for_device_only_affects_that_device() {
        let waiter = CommandWaiter::new();
        let rx_a = waiter.register("rid-a", "device-a");
        let _rx_b = waiter.register("rid-b", "device-b");
        waiter.fail_pending_for_device("device-a", json!({"error": {"code": "send_failed"}}));
        assert!(rx_a.try_recv().is_ok());
        // device-b's mailbox is untouched: it can still be resolved normally.
        assert!(waiter.resolve("rid-b", json!({"ok": true})));
    }
}
