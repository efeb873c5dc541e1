//! `mcp/dev/{device_id}/{leaf}` topic grammar.
//!
//! Both transports speak this grammar: the broker transport as literal MQTT
//! topic strings, the stream transport as the `topic` field of each framed
//! JSON line.

use std::fmt;

const PREFIX: &str = "mcp/dev";

/// Inbound and outbound leaves recognized under `mcp/dev/{device_id}/...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leaf {
    Announce,
    Status,
    Events,
    PortsAnnounce,
    PortsData,
    PortsSet,
    Cmd,
    Claim,
}

impl Leaf {
    fn as_str(self) -> &'static str {
        match self {
            Leaf::Announce => "announce",
            Leaf::Status => "status",
            Leaf::Events => "events",
            Leaf::PortsAnnounce => "ports/announce",
            Leaf::PortsData => "ports/data",
            Leaf::PortsSet => "ports/set",
            Leaf::Cmd => "cmd",
            Leaf::Claim => "claim",
        }
    }

    fn parse(leaf: &str) -> Option<Self> {
        Some(match leaf {
            "announce" => Leaf::Announce,
            "status" => Leaf::Status,
            "events" => Leaf::Events,
            "ports/announce" => Leaf::PortsAnnounce,
            "ports/data" => Leaf::PortsData,
            "ports/set" => Leaf::PortsSet,
            "cmd" => Leaf::Cmd,
            "claim" => Leaf::Claim,
            _ => return None,
        })
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `mcp/dev/{device_id}/{leaf}` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub device_id: String,
    pub leaf: Leaf,
}

impl Topic {
    #[must_use]
    pub fn new(device_id: impl Into<String>, leaf: Leaf) -> Self {
        Self {
            device_id: device_id.into(),
            leaf,
        }
    }

    /// Parses a topic string of the form `mcp/dev/{device_id}/{leaf}`.
    ///
    /// Returns `None` if the string does not start with the fixed prefix,
    /// lacks a device id segment, or the leaf is not one of the recognized
    /// forms. Unknown leaves under a well-formed prefix are deliberately
    /// rejected here rather than passed through: callers that need to log
    /// "unknown leaf" should inspect the raw string themselves.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(PREFIX)?.strip_prefix('/')?;
        let (device_id, leaf_str) = rest.split_once('/')?;
        if device_id.is_empty() {
            return None;
        }
        let leaf = Leaf::parse(leaf_str)?;
        Some(Self {
            device_id: device_id.to_string(),
            leaf,
        })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}/{}/{}", self.device_id, self.leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_leaf() {
        let t = Topic::new("sensor01", Leaf::Announce);
        let s = t.to_string();
        assert_eq!(s, "mcp/dev/sensor01/announce");
        assert_eq!(Topic::parse(&s), Some(t));
    }

    #[test]
    fn roundtrip_nested_leaf() {
        let t = Topic::new("sensor01", Leaf::PortsData);
        let s = t.to_string();
        assert_eq!(s, "mcp/dev/sensor01/ports/data");
        assert_eq!(Topic::parse(&s), Some(t));
    }

    #[test]
    fn rejects_missing_device_id() {
        assert_eq!(Topic::parse("mcp/dev//announce"), None);
    }

    #[test]
    fn rejects_unknown_leaf() {
        assert_eq!(Topic::parse("mcp/dev/sensor01/bogus"), None);
    }

    #[test]
    fn rejects_foreign_prefix() {
        assert_eq!(Topic::parse("other/dev/sensor01/announce"), None);
    }
}
