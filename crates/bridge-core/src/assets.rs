//! Last-event-payload cache backing the `asset/{request_id}` resource:
//! the last event payload seen for a request, for asset-bearing responses.
//! Bounded so a flood of commands cannot grow this without limit — oldest
//! entries are evicted first.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

const CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    by_request: HashMap<String, Value>,
    order: VecDeque<String>,
}

/// Records the most recent `events` payload seen for each `request_id`,
/// independent of whether a mailbox is still waiting on it (a caller may
/// want to fetch assets from a response after `publish_cmd` already
/// returned).
#[derive(Default)]
pub struct AssetCache {
    inner: RwLock<Inner>,
}

impl AssetCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, request_id: &str, payload: Value) {
        let mut inner = self.inner.write();
        if !inner.by_request.contains_key(request_id) {
            inner.order.push_back(request_id.to_string());
            while inner.order.len() > CAPACITY {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.by_request.remove(&oldest);
                }
            }
        }
        inner.by_request.insert(request_id.to_string(), payload);
    }

    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<Value> {
        self.inner.read().by_request.get(request_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_and_fetches_last_payload() {
        let cache = AssetCache::new();
        cache.record("rid-1", json!({"result": {"text": "42"}}));
        assert_eq!(cache.get("rid-1").unwrap()["result"]["text"], "42");
        assert!(cache.get("rid-missing").is_none());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = AssetCache::new();
        for i in 0..(CAPACITY + 10) {
            cache.record(&format!("rid-{i}"), json!({"i": i}));
        }
        assert!(cache.get("rid-0").is_none());
        assert!(cache.get(&format!("rid-{}", CAPACITY + 9)).is_some());
    }
}
