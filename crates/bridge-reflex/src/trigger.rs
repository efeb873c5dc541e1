//! Trigger types a reflex can bind to: cron schedule, process startup, or a
//! named IPC event. Each trigger owns its own interior-mutable state
//! (`next_run`, `fired`) since `Reflex`es live behind a shared registry and
//! are checked concurrently by the engine's tick loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// The event the engine's tick loop is currently distributing to every
/// reflex. Schedule triggers only fire on `ScheduleTick`, IPC triggers only
/// on `Ipc`, startup triggers only on `Startup`.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    ScheduleTick,
    Ipc { name: String, payload: Value },
    Startup,
}

impl TriggerEvent {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            TriggerEvent::ScheduleTick => json!({ "type": "schedule_tick" }),
            TriggerEvent::Ipc { name, payload } => {
                json!({ "type": "ipc_event", "name": name, "payload": payload })
            }
            TriggerEvent::Startup => json!({ "type": "startup" }),
        }
    }
}

#[async_trait]
pub trait Trigger: Send + Sync {
    fn trigger_type(&self) -> &'static str;

    /// Cooldown after a successful fire, before this trigger can fire
    /// again.
    fn cooldown_sec(&self) -> u64;

    /// Checks whether this trigger fires for `event` given the current
    /// `state`, returning `(fired, context)`. `context` is always an
    /// object, populated whether or not the trigger fired, so a caller can
    /// log it either way.
    async fn check(&self, event: &TriggerEvent, state: &Value) -> (bool, Value);

    fn to_value(&self) -> Value;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
    #[serde(default)]
    pub cooldown_sec: u64,
}

/// Cron-scheduled trigger, evaluated with the `cron` crate.
pub struct ScheduleTrigger {
    cron_expr: String,
    cooldown_sec: u64,
    schedule: Schedule,
    next_run: Mutex<DateTime<Utc>>,
}

impl ScheduleTrigger {
    pub fn new(config: ScheduleConfig) -> Result<Self, String> {
        // The `cron` crate expects a leading seconds field; a standard
        // 5-field cron expression is widened to 6 fields by prefixing "0".
        let six_field = if config.cron.split_whitespace().count() == 5 {
            format!("0 {}", config.cron)
        } else {
            config.cron.clone()
        };
        let schedule = Schedule::from_str(&six_field)
            .map_err(|e| format!("invalid cron expression '{}': {e}", config.cron))?;
        let next_run = schedule
            .upcoming(Utc)
            .next()
            .ok_or_else(|| format!("cron expression '{}' has no upcoming runs", config.cron))?;
        Ok(Self {
            cron_expr: config.cron,
            cooldown_sec: config.cooldown_sec,
            schedule,
            next_run: Mutex::new(next_run),
        })
    }
}

#[async_trait]
impl Trigger for ScheduleTrigger {
    fn trigger_type(&self) -> &'static str {
        "schedule"
    }

    fn cooldown_sec(&self) -> u64 {
        self.cooldown_sec
    }

    async fn check(&self, event: &TriggerEvent, _state: &Value) -> (bool, Value) {
        if !matches!(event, TriggerEvent::ScheduleTick) {
            return (false, json!({}));
        }
        let now = Utc::now();
        let next_run = *self.next_run.lock();
        let mut context = json!({
            "type": "schedule",
            "cron": self.cron_expr,
            "next_run": next_run.to_rfc3339(),
            "checked_at": now.to_rfc3339(),
        });
        if now >= next_run {
            if let Some(next) = self.schedule.after(&now).next() {
                *self.next_run.lock() = next;
                context["next_run"] = json!(next.to_rfc3339());
            }
            context["fired_at"] = json!(now.to_rfc3339());
            (true, context)
        } else {
            (false, context)
        }
    }

    fn to_value(&self) -> Value {
        json!({ "type": "schedule", "cron": self.cron_expr, "cooldown_sec": self.cooldown_sec })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default)]
    pub cooldown_sec: u64,
}

/// Fires exactly once, the first time the engine delivers a `Startup`
/// event.
pub struct StartupTrigger {
    cooldown_sec: u64,
    fired: AtomicBool,
}

impl StartupTrigger {
    #[must_use]
    pub fn new(config: StartupConfig) -> Self {
        Self { cooldown_sec: config.cooldown_sec, fired: AtomicBool::new(false) }
    }
}

#[async_trait]
impl Trigger for StartupTrigger {
    fn trigger_type(&self) -> &'static str {
        "startup"
    }

    fn cooldown_sec(&self) -> u64 {
        self.cooldown_sec
    }

    async fn check(&self, event: &TriggerEvent, _state: &Value) -> (bool, Value) {
        if !matches!(event, TriggerEvent::Startup) {
            return (false, json!({}));
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return (false, json!({}));
        }
        (true, json!({ "type": "startup", "fired_at": Utc::now().to_rfc3339() }))
    }

    fn to_value(&self) -> Value {
        json!({ "type": "startup", "cooldown_sec": self.cooldown_sec })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    pub event_name: String,
    #[serde(default)]
    pub cooldown_sec: u64,
}

/// Fires when the engine drains an IPC event whose `name` matches.
pub struct IpcEventTrigger {
    event_name: String,
    cooldown_sec: u64,
}

impl IpcEventTrigger {
    #[must_use]
    pub fn new(config: IpcConfig) -> Self {
        Self { event_name: config.event_name, cooldown_sec: config.cooldown_sec }
    }
}

#[async_trait]
impl Trigger for IpcEventTrigger {
    fn trigger_type(&self) -> &'static str {
        "ipc_event"
    }

    fn cooldown_sec(&self) -> u64 {
        self.cooldown_sec
    }

    async fn check(&self, event: &TriggerEvent, _state: &Value) -> (bool, Value) {
        let TriggerEvent::Ipc { name, payload } = event else {
            return (false, json!({}));
        };
        if name != &self.event_name {
            return (false, json!({}));
        }
        (
            true,
            json!({ "type": "ipc_event", "name": name, "payload": payload, "fired_at": Utc::now().to_rfc3339() }),
        )
    }

    fn to_value(&self) -> Value {
        json!({ "type": "ipc_event", "event_name": self.event_name, "cooldown_sec": self.cooldown_sec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_trigger_fires_exactly_once() {
        let t = StartupTrigger::new(StartupConfig { cooldown_sec: 0 });
        let (fired, _) = t.check(&TriggerEvent::Startup, &json!({})).await;
        assert!(fired);
        let (fired_again, _) = t.check(&TriggerEvent::Startup, &json!({})).await;
        assert!(!fired_again);
    }

    #[tokio::test]
    async fn ipc_trigger_matches_by_name_only() {
        let t = IpcEventTrigger::new(IpcConfig { event_name: "wakeword".to_string(), cooldown_sec: 0 });
        let (fired, _) = t
            .check(&TriggerEvent::Ipc { name: "other".to_string(), payload: json!({}) }, &json!({}))
            .await;
        assert!(!fired);
        let (fired, ctx) = t
            .check(&TriggerEvent::Ipc { name: "wakeword".to_string(), payload: json!({"v": 1}) }, &json!({}))
            .await;
        assert!(fired);
        assert_eq!(ctx["name"], "wakeword");
    }

    #[tokio::test]
    async fn schedule_trigger_ignores_non_tick_events() {
        let t = ScheduleTrigger::new(ScheduleConfig { cron: "* * * * *".to_string(), cooldown_sec: 0 }).unwrap();
        let (fired, _) = t.check(&TriggerEvent::Startup, &json!({})).await;
        assert!(!fired);
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let result = ScheduleTrigger::new(ScheduleConfig { cron: "not a cron".to_string(), cooldown_sec: 0 });
        assert!(result.is_err());
    }
}
