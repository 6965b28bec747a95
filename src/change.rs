//! Decides, from the sidecar next to a local file and the remote item's
//! attributes, whether the file must be redownloaded.

use std::path::Path;

use crate::sidecar::{self, Sidecar};

/// `xor_hash` is recorded in the sidecar but intentionally excluded from
/// this comparison, matching the source system's behavior (recorded
/// without being checked). See `ChangePredicate::strict` for an opt-in
/// comparison that also consults it.
pub struct ChangePredicate {
    strict: bool,
}

impl Default for ChangePredicate {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangePredicate {
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Opt-in mode that additionally requires the remote `xor_hash` to
    /// match the sidecar's recorded value.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// `local_file` is the path to the mirrored file itself (its sidecar
    /// lives in the same directory, per the per-file layout).
    #[allow(clippy::too_many_arguments)]
    pub fn is_changed(
        &self,
        local_file: &Path,
        remote_size: i64,
        remote_xor_hash: Option<&str>,
        remote_url: Option<&str>,
        remote_creation_date: Option<&str>,
        original_path: &str,
    ) -> bool {
        if !local_file.exists() {
            return true;
        }
        let Some(file_dir) = local_file.parent() else {
            return true;
        };
        let Some(recorded) = sidecar::read(file_dir) else {
            return true;
        };
        !self.matches(&recorded, remote_size, remote_xor_hash, remote_url, remote_creation_date, original_path)
    }

    fn matches(
        &self,
        recorded: &Sidecar,
        remote_size: i64,
        remote_xor_hash: Option<&str>,
        remote_url: Option<&str>,
        remote_creation_date: Option<&str>,
        original_path: &str,
    ) -> bool {
        let base = recorded.size == remote_size
            && recorded.url.as_deref() == remote_url
            && recorded.creation_date.as_deref() == remote_creation_date
            && recorded.original_path == original_path;
        if !self.strict {
            return base;
        }
        base && recorded.xor_hash.as_deref() == remote_xor_hash
    }
}
