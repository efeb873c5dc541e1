//! A reflex's lifecycle: when it expires and stops firing. Cooldown between
//! individual fires lives on the trigger instead (see `trigger.rs`), not
//! here — lifecycle only governs the reflex's overall lifespan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleType {
    Persistent,
    Temporary,
    MaxRuns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(rename = "type")]
    pub kind: LifecycleType,
    #[serde(default)]
    pub ttl_sec: Option<i64>,
    #[serde(default)]
    pub max_runs: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    /// Normalizes a freshly-loaded lifecycle: stamps `created_at` if
    /// absent, and computes `expire_at` for `temporary` lifecycles that
    /// don't already carry one.
    pub fn finalize(&mut self) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        if self.kind == LifecycleType::Temporary && self.expire_at.is_none() {
            if let Some(ttl) = self.ttl_sec {
                self.expire_at = Some(now + chrono::Duration::seconds(ttl));
            }
        }
    }

    /// `persistent` never expires, `temporary` expires once `expire_at` has
    /// passed, `max_runs` expires once `runs` reaches the configured cap.
    #[must_use]
    pub fn expired(&self, runs: u64) -> bool {
        match self.kind {
            LifecycleType::Persistent => false,
            LifecycleType::Temporary => self.expire_at.is_some_and(|at| Utc::now() > at),
            LifecycleType::MaxRuns => self.max_runs.is_some_and(|cap| runs >= cap),
        }
    }

    /// Structural validation applied on load.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            LifecycleType::Temporary if !self.ttl_sec.is_some_and(|t| t > 0) => {
                Err("temporary lifecycle requires ttl_sec > 0".to_string())
            }
            LifecycleType::MaxRuns if !self.max_runs.is_some_and(|m| m > 0) => {
                Err("max_runs lifecycle requires max_runs > 0".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_never_expires() {
        let lc = Lifecycle { kind: LifecycleType::Persistent, ttl_sec: None, max_runs: None, created_at: None, expire_at: None };
        assert!(!lc.expired(1_000_000));
    }

    #[test]
    fn max_runs_expires_at_cap() {
        let lc = Lifecycle { kind: LifecycleType::MaxRuns, ttl_sec: None, max_runs: Some(3), created_at: None, expire_at: None };
        assert!(!lc.expired(2));
        assert!(lc.expired(3));
    }

    #[test]
    fn temporary_finalize_computes_expire_at() {
        let mut lc = Lifecycle { kind: LifecycleType::Temporary, ttl_sec: Some(60), max_runs: None, created_at: None, expire_at: None };
        lc.finalize();
        assert!(lc.expire_at.unwrap() > Utc::now());
        assert!(!lc.expired(0));
    }

    #[test]
    fn temporary_without_ttl_fails_validation() {
        let lc = Lifecycle { kind: LifecycleType::Temporary, ttl_sec: None, max_runs: None, created_at: None, expire_at: None };
        assert!(lc.validate().is_err());
    }
}
