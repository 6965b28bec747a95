//! Depth-first recursive enumeration of a drive's folder tree, emitting
//! leaf file entries into the pending queue and creating local folders
//! as it descends.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use crate::dispatcher::BatchDispatcher;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::model::{join_posix, PendingEntry};

/// Defensive cap on recursion depth; a true tree never approaches this,
/// so overflow is treated as a transport anomaly (likely a cyclic or
/// malformed listing) rather than silently looping forever.
const MAX_DEPTH: usize = 64;

pub struct TreeWalker {
    gateway: Arc<dyn RemoteGateway>,
    local_root: std::path::PathBuf,
}

impl TreeWalker {
    pub fn new(gateway: Arc<dyn RemoteGateway>, local_root: std::path::PathBuf) -> Self {
        Self { gateway, local_root }
    }

    /// Walk `folder_id`'s children under `parent_rel`, appending files to
    /// `queue` and recursing into subfolders. Between each folder's
    /// children being enumerated, `dispatcher.maybe_drain` is invoked to
    /// opportunistically drain whole batches.
    pub async fn walk_folder(
        &self,
        drive_id: &str,
        folder_id: &str,
        parent_rel: &str,
        queue: &mut VecDeque<PendingEntry>,
        dispatcher: &BatchDispatcher,
        depth: usize,
    ) -> Result<(), GatewayError> {
        if depth > MAX_DEPTH {
            crate::logging::error(format!(
                "max recursion depth exceeded under {parent_rel}; treating as transport anomaly"
            ));
            return Err(GatewayError::Transport);
        }

        let children = self.gateway.list_children(drive_id, folder_id).await?;
        for child in children {
            if child.name.is_empty() {
                continue;
            }
            if child.is_folder {
                let child_rel = join_posix(parent_rel, &child.name);
                ensure_dir(&self.local_root, &child_rel)?;
                Box::pin(self.walk_folder(drive_id, &child.id, &child_rel, queue, dispatcher, depth + 1))
                    .await?;
            } else {
                queue.push_back(PendingEntry {
                    drive_id: drive_id.to_string(),
                    parent_folder_rel: parent_rel.to_string(),
                    item: child,
                });
            }
        }

        dispatcher.maybe_drain(queue, false).await
    }
}

fn ensure_dir(local_root: &Path, rel: &str) -> Result<(), GatewayError> {
    std::fs::create_dir_all(local_root.join(rel)).map_err(|e| {
        crate::logging::error(format!("failed to create folder {rel}: {e}"));
        GatewayError::Transport
    })
}
