//! CLI configuration: a `clap` derive struct with `env` feature flags and
//! an XDG-aware default config directory, so every path below can be left
//! unset and fall back to `$XDG_CONFIG_HOME/bridge/`.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "bridge", about = "Device-to-tool bridge and reflex orchestrator")]
pub struct Config {
    /// MQTT-shaped broker host devices announce themselves on.
    #[arg(long, env = "BRIDGE_BROKER_HOST", default_value = "127.0.0.1")]
    pub broker_host: String,

    /// MQTT-shaped broker port.
    #[arg(long, env = "BRIDGE_BROKER_PORT", default_value_t = 1883)]
    pub broker_port: u16,

    /// Bind address for the line-delimited JSON stream-socket transport.
    #[arg(long, env = "BRIDGE_STREAM_BIND", default_value = "0.0.0.0:7000")]
    pub stream_bind: String,

    /// Bind address for the MCP server and admin REST surface.
    #[arg(long, env = "BRIDGE_HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: String,

    /// Per-command mailbox wait, milliseconds.
    #[arg(long, env = "BRIDGE_CMD_TIMEOUT_MS", default_value_t = 15_000)]
    pub cmd_timeout_ms: u64,

    /// Directory holding every JSON store and the reflex rules directory,
    /// used to fill in any of the more specific paths below left unset.
    #[arg(long, env = "BRIDGE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_DEVICE_SNAPSHOT_PATH")]
    pub device_snapshot_path: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_PROJECTION_PATH")]
    pub projection_path: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_ROUTING_PATH")]
    pub routing_path: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_VIRTUAL_TOOLS_PATH")]
    pub virtual_tools_path: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_REFLEX_DIR")]
    pub reflex_dir: Option<PathBuf>,

    #[arg(long, env = "BRIDGE_HISTORY_DB_PATH")]
    pub history_db_path: Option<PathBuf>,
}

impl Config {
    #[must_use]
    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }

    fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    #[must_use]
    pub fn device_snapshot_path(&self) -> PathBuf {
        self.device_snapshot_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join("devices.json"))
    }

    #[must_use]
    pub fn projection_path(&self) -> PathBuf {
        self.projection_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join("projections.json"))
    }

    #[must_use]
    pub fn routing_path(&self) -> PathBuf {
        self.routing_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join("connections.json"))
    }

    #[must_use]
    pub fn virtual_tools_path(&self) -> PathBuf {
        self.virtual_tools_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join("virtual_tools.json"))
    }

    #[must_use]
    pub fn reflex_dir(&self) -> PathBuf {
        self.reflex_dir
            .clone()
            .unwrap_or_else(|| self.config_dir().join("reflexes"))
    }

    #[must_use]
    pub fn history_db_path(&self) -> PathBuf {
        self.history_db_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join("history.db"))
    }
}

fn default_config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(".config")
        });
    base.join("bridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_overrides_config_dir() {
        let cfg = Config {
            broker_host: "h".to_string(),
            broker_port: 1,
            stream_bind: "x".to_string(),
            http_bind: "y".to_string(),
            cmd_timeout_ms: 1,
            config_dir: Some(PathBuf::from("/tmp/cfgdir")),
            device_snapshot_path: Some(PathBuf::from("/explicit/devices.json")),
            projection_path: None,
            routing_path: None,
            virtual_tools_path: None,
            reflex_dir: None,
            history_db_path: None,
        };
        assert_eq!(cfg.device_snapshot_path(), PathBuf::from("/explicit/devices.json"));
        assert_eq!(cfg.projection_path(), PathBuf::from("/tmp/cfgdir/projections.json"));
    }
}
