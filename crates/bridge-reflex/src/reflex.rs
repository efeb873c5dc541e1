//! The `Reflex` aggregate: a loaded rule combining a trigger, an action,
//! and its own run bookkeeping.

use crate::action::Action;
use crate::lifecycle::Lifecycle;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A loaded reflex rule: one trigger, one action, the tool names it may
/// call, a lifecycle, and run bookkeeping.
pub struct Reflex {
    pub id: String,
    pub name: String,
    pub trigger: Arc<dyn Trigger>,
    pub action: Arc<dyn Action>,
    pub tools: Vec<String>,
    pub lifecycle: Lifecycle,
    pub enabled: RwLock<bool>,
    pub source_file: Option<String>,
    runs: AtomicU64,
    created_at: DateTime<Utc>,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl Reflex {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: String,
        trigger: Arc<dyn Trigger>,
        action: Arc<dyn Action>,
        tools: Vec<String>,
        mut lifecycle: Lifecycle,
        enabled: bool,
        source_file: Option<String>,
    ) -> Self {
        lifecycle.finalize();
        Self {
            id,
            name,
            trigger,
            action,
            tools,
            lifecycle,
            enabled: RwLock::new(enabled),
            source_file,
            runs: AtomicU64::new(0),
            created_at: Utc::now(),
            last_run: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write() = enabled;
    }

    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Bumps the run counter and stamps `last_run`, called after a
    /// successful `check`-then-`execute`.
    pub fn increment_runs(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last_run.write() = Some(Utc::now());
    }

    /// True while `trigger.cooldown_sec()` hasn't elapsed since the last
    /// run. Cooldown is read from the trigger, not the lifecycle.
    #[must_use]
    pub fn is_in_cooldown(&self) -> bool {
        let cooldown = self.trigger.cooldown_sec();
        if cooldown == 0 {
            return false;
        }
        match *self.last_run.read() {
            Some(last) => Utc::now() < last + chrono::Duration::seconds(cooldown as i64),
            None => false,
        }
    }

    /// Delegates to `Lifecycle::expired` with the current run count.
    #[must_use]
    pub fn should_expire(&self) -> bool {
        self.lifecycle.expired(self.runs())
    }

    #[must_use]
    pub fn metadata(&self) -> Value {
        json!({
            "created_at": self.created_at.to_rfc3339(),
            "runs": self.runs(),
            "last_run": self.last_run.read().map(|t| t.to_rfc3339()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionResult, ExecutionContext};
    use crate::lifecycle::LifecycleType;
    use crate::trigger::{StartupConfig, StartupTrigger};
    use async_trait::async_trait;

    struct NoopAction;

    #[async_trait]
    impl Action for NoopAction {
        fn action_type(&self) -> &'static str {
            "noop"
        }
        async fn execute(&self, _ctx: &ExecutionContext<'_>) -> ActionResult {
            ActionResult { success: true, text: String::new(), tool_calls: vec![], error: None }
        }
        fn to_value(&self) -> Value {
            json!({"type": "noop"})
        }
    }

    fn make_reflex(max_runs: Option<u64>) -> Reflex {
        let lifecycle = match max_runs {
            Some(cap) => Lifecycle { kind: LifecycleType::MaxRuns, ttl_sec: None, max_runs: Some(cap), created_at: None, expire_at: None },
            None => Lifecycle { kind: LifecycleType::Persistent, ttl_sec: None, max_runs: None, created_at: None, expire_at: None },
        };
        Reflex::new(
            "r1".to_string(),
            "r1".to_string(),
            Arc::new(StartupTrigger::new(StartupConfig { cooldown_sec: 5 })),
            Arc::new(NoopAction),
            vec![],
            lifecycle,
            true,
            None,
        )
    }

    #[test]
    fn fresh_reflex_is_not_in_cooldown() {
        let r = make_reflex(None);
        assert!(!r.is_in_cooldown());
    }

    #[test]
    fn run_starts_cooldown() {
        let r = make_reflex(None);
        r.increment_runs();
        assert!(r.is_in_cooldown());
        assert_eq!(r.runs(), 1);
    }

    #[test]
    fn max_runs_expires_after_cap() {
        let r = make_reflex(Some(2));
        assert!(!r.should_expire());
        r.increment_runs();
        assert!(!r.should_expire());
        r.increment_runs();
        assert!(r.should_expire());
    }

    #[test]
    fn enabled_flag_is_mutable() {
        let r = make_reflex(None);
        assert!(r.is_enabled());
        r.set_enabled(false);
        assert!(!r.is_enabled());
    }
}
