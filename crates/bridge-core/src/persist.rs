//! Atomic JSON snapshot persistence: write temp file + rename, applied to
//! every persisted store (device snapshot, projection config, routing
//! connections, and virtual tools alike).

use crate::error::{BridgeError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads `T` from `path` as pretty JSON, returning `default()` if the file
/// does not exist yet.
pub fn load_or_default<T: DeserializeOwned>(path: &Path, default: impl FnOnce() -> T) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(default()),
        Err(e) => Err(BridgeError::Io(e)),
    }
}

/// Serializes `value` to pretty JSON and writes it to `path` atomically:
/// write to a sibling temp file, then rename over the destination. A crash
/// mid-write leaves the previous snapshot intact rather than a truncated
/// file.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn load_missing_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Sample = load_or_default(&path, Sample::default).unwrap();
        assert_eq!(loaded, Sample { value: 0 });
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        save_atomic(&path, &Sample { value: 7 }).unwrap();
        let loaded: Sample = load_or_default(&path, Sample::default).unwrap();
        assert_eq!(loaded, Sample { value: 7 });
        assert!(!path.with_extension("json.tmp").exists());
    }
}
