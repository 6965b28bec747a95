use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named root of a folder tree within the remote site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub id: String,
    pub name: String,
}

/// A file or folder as reported by the listing endpoint. Some fields
/// (download URL, authoritative size, hash) are only populated once the
/// batch endpoint resolves the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub web_url: Option<String>,
    /// Date-only, `YYYY-MM-DD`.
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub quick_xor_hash: Option<String>,
}

/// A file entry discovered during the tree walk, waiting for metadata
/// resolution and download.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub drive_id: String,
    /// POSIX-style path relative to the drive name, e.g. `DriveA/sub/deeper`.
    pub parent_folder_rel: String,
    pub item: RemoteItem,
}

impl PendingEntry {
    pub fn folder_rel(&self) -> String {
        join_posix(&self.parent_folder_rel, &self.item.name)
    }
}

/// The outcome of resolving one `PendingEntry` through the batch endpoint.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub pending: PendingEntry,
    pub download_url: Option<String>,
    pub size: i64,
    pub quick_xor_hash: Option<String>,
}

pub fn join_posix(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
