//! Copies soon-to-be-replaced or soon-to-be-deleted local files into a
//! timestamped archive tree under `<local_root>/saves/<run_timestamp>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const SAVES_DIR: &str = "saves";

pub struct ArchiveStore {
    local_root: PathBuf,
    run_timestamp: String,
}

impl ArchiveStore {
    pub fn new(local_root: impl Into<PathBuf>, run_timestamp: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            run_timestamp: run_timestamp.into(),
        }
    }

    fn run_root(&self) -> PathBuf {
        self.local_root.join(SAVES_DIR).join(&self.run_timestamp)
    }

    /// Copy the current contents of `<local_root>/<rel_path>` (the
    /// per-file directory, i.e. everything including the sidecar) into
    /// `saves/<run_timestamp>/<rel_path>` before it is overwritten or
    /// deleted. No-op if the source does not exist (e.g. a brand new
    /// file has nothing to archive yet).
    pub fn archive(&self, rel_path: &str) -> Result<()> {
        let origin = self.local_root.join(rel_path);
        if !origin.exists() {
            return Ok(());
        }
        let destination = self.run_root().join(rel_path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create archive parent {}", parent.display()))?;
        }
        copy_recursive(&origin, &destination)
            .with_context(|| format!("archive {} to {}", origin.display(), destination.display()))
    }

    /// Remove the original after archiving, used only when `prune=true`.
    pub fn delete_original(&self, rel_path: &str) -> Result<()> {
        let path = self.local_root.join(rel_path);
        if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("delete {}", path.display()))
    }
}

fn copy_recursive(origin: &Path, destination: &Path) -> Result<()> {
    if origin.is_dir() {
        fs::create_dir_all(destination)?;
        for entry in fs::read_dir(origin)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &destination.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(origin, destination)?;
        Ok(())
    }
}
