//! Per-file JSON sidecar describing the last successful download, stored
//! at `<file_dir>/metadata.json` next to the mirrored file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SIDECAR_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub size: i64,
    pub original_path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub xor_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub creation_date: Option<String>,
}

/// Read the sidecar next to a mirrored file. Returns `None` if it is
/// missing or unreadable rather than failing the caller (per I1, absence
/// forces a redownload rather than aborting the run).
pub fn read(file_dir: &Path) -> Option<Sidecar> {
    let data = fs::read_to_string(file_dir.join(SIDECAR_FILE_NAME)).ok()?;
    serde_json::from_str(&data).ok()
}

/// Write the sidecar, overwriting any previous one. Called only after the
/// corresponding file content has been fully written.
pub fn write(file_dir: &Path, sidecar: &Sidecar) -> Result<()> {
    fs::create_dir_all(file_dir)
        .with_context(|| format!("create {}", file_dir.display()))?;
    let body = serde_json::to_string_pretty(sidecar).context("serialize sidecar")?;
    let path = file_dir.join(SIDECAR_FILE_NAME);
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let dir = std::env::temp_dir().join("graphmirror-sidecar-test-round-trip");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let sidecar = Sidecar {
            size: 13,
            original_path: "D/a.txt".to_string(),
            xor_hash: Some("deadbeef".to_string()),
            url: Some("u1".to_string()),
            creation_date: Some("2024-01-02".to_string()),
        };
        write(&dir, &sidecar).unwrap();
        let read_back = read(&dir).expect("sidecar should exist");
        assert_eq!(read_back, sidecar);
    }

    #[test]
    fn missing_sidecar_reads_as_none() {
        let dir = std::env::temp_dir().join("graphmirror-sidecar-test-missing");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        assert!(read(&dir).is_none());
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let dir = std::env::temp_dir().join("graphmirror-sidecar-test-optional");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let sidecar = Sidecar {
            size: 5,
            original_path: "D/b.txt".to_string(),
            xor_hash: None,
            url: None,
            creation_date: None,
        };
        write(&dir, &sidecar).unwrap();
        let raw = fs::read_to_string(dir.join(SIDECAR_FILE_NAME)).unwrap();
        assert!(!raw.contains("xor_hash"));
        assert!(!raw.contains("\"url\""));
    }
}
