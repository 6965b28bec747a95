//! Per-drive sync lifecycle: select drives, walk, drain, reconcile
//! deletions, and respond to cancellation.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::archive::ArchiveStore;
use crate::change::ChangePredicate;
use crate::config::SyncConfig;
use crate::dispatcher::BatchDispatcher;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::model::Drive;
use crate::walker::TreeWalker;

pub struct SyncOrchestrator {
    config: SyncConfig,
    gateway: Arc<dyn RemoteGateway>,
    archive: Arc<ArchiveStore>,
    cancel: CancellationToken,
    selected_drives: Vec<Drive>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        gateway: Arc<dyn RemoteGateway>,
        run_timestamp: String,
        cancel: CancellationToken,
    ) -> Self {
        let archive = Arc::new(ArchiveStore::new(config.local_root.clone(), run_timestamp));
        Self {
            config,
            gateway,
            archive,
            cancel,
            selected_drives: Vec::new(),
        }
    }

    /// Fetch the site's drives and intersect with the configured wanted
    /// names; logs any requested names that were not found remotely.
    pub async fn select_drives(&mut self) -> Result<(), GatewayError> {
        let wanted: HashSet<&str> = self.config.drives.iter().map(String::as_str).collect();
        let all = self.gateway.list_drives(&self.config.site_id).await?;

        let found_names: HashSet<&str> = all.iter().map(|d| d.name.as_str()).collect();
        let missing: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|name| !found_names.contains(name))
            .collect();
        if !missing.is_empty() {
            crate::logging::info(format!("{missing:?} - Drive(s) don't exist, skipping..."));
        }

        self.selected_drives = all.into_iter().filter(|d| wanted.contains(d.name.as_str())).collect();
        Ok(())
    }

    /// Run the whole sync: every selected drive in turn; a non-cancellation
    /// failure on one drive is logged and the orchestrator moves on to the
    /// next. Cancellation propagates and triggers archival reconciliation.
    pub async fn run(&self) -> Result<(), GatewayError> {
        for drive in &self.selected_drives {
            match self.sync_drive(&drive.id, &drive.name).await {
                Ok(()) => {}
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(e) => {
                    crate::logging::error(format!("Error downloading drive {} ({}): {e}", drive.name, drive.id));
                }
            }
        }
        Ok(())
    }

    /// Partitions the drive's top-level children across `worker_limit`
    /// independent `(queue, BatchDispatcher)` shards so that whole
    /// subtrees (never a folder split mid-tree) walk and drain
    /// concurrently, then reconciles deletions once every shard finishes.
    async fn sync_drive(&self, drive_id: &str, drive_name: &str) -> Result<(), GatewayError> {
        let drive_root = self.config.local_root.join(drive_name);
        std::fs::create_dir_all(&drive_root).map_err(|_| GatewayError::Transport)?;

        let observed = Arc::new(Mutex::new(HashSet::new()));
        let top_children = self.gateway.list_children(drive_id, "root").await?;

        let shard_count = self.config.worker_limit.max(1);
        let mut shards: Vec<Vec<crate::model::RemoteItem>> = (0..shard_count).map(|_| Vec::new()).collect();
        for (i, child) in top_children.into_iter().filter(|c| !c.name.is_empty()).enumerate() {
            shards[i % shard_count].push(child);
        }

        let mut tasks = Vec::new();
        for shard in shards {
            if shard.is_empty() {
                continue;
            }
            let gateway = self.gateway.clone();
            let archive = self.archive.clone();
            let local_root = self.config.local_root.clone();
            let batch_limit = self.config.batch_limit;
            let chunk_size = self.config.chunk_size;
            let cancel = self.cancel.clone();
            let observed = observed.clone();
            let drive_id = drive_id.to_string();
            let drive_name = drive_name.to_string();

            tasks.push(async move {
                let walker = TreeWalker::new(gateway.clone(), local_root.clone());
                let dispatcher = BatchDispatcher::new(
                    gateway.clone(),
                    archive,
                    local_root.clone(),
                    batch_limit,
                    chunk_size,
                    ChangePredicate::new(),
                    cancel,
                    observed,
                );

                let mut queue = VecDeque::new();
                for child in shard {
                    if child.is_folder {
                        let child_rel = crate::model::join_posix(&drive_name, &child.name);
                        std::fs::create_dir_all(local_root.join(&child_rel)).map_err(|_| GatewayError::Transport)?;
                        walker
                            .walk_folder(&drive_id, &child.id, &child_rel, &mut queue, &dispatcher, 0)
                            .await?;
                    } else {
                        queue.push_back(crate::model::PendingEntry {
                            drive_id: drive_id.clone(),
                            parent_folder_rel: drive_name.clone(),
                            item: child,
                        });
                    }
                }

                loop {
                    dispatcher.maybe_drain(&mut queue, true).await?;
                    if queue.is_empty() {
                        break;
                    }
                }
                Ok::<(), GatewayError>(())
            });
        }

        let results = future::join_all(tasks).await;
        let mut cancelled = false;
        for result in results {
            match result {
                Ok(()) => {}
                Err(GatewayError::Cancelled) => cancelled = true,
                Err(e) => crate::logging::error(format!("shard of drive {drive_name} failed: {e}")),
            }
        }

        // Reconciliation always archives; `prune` only additionally
        // deletes the original from the local tree.
        self.reconcile_deletions(drive_name, &observed).await;

        if cancelled {
            return Err(GatewayError::Cancelled);
        }
        Ok(())
    }

    /// Archive (and, if `prune` is set, delete) every local file under
    /// `drive_name` that was not observed during this run's walk.
    async fn reconcile_deletions(&self, drive_name: &str, observed: &Mutex<HashSet<String>>) {
        let drive_root = self.config.local_root.join(drive_name);
        if !drive_root.exists() {
            return;
        }
        let observed = observed.lock().await;

        // Each mirrored file lives in its own same-named directory (the
        // per-file sidecar layout), so a file's `WalkDir` entry sits one
        // level below the `folder_rel` granularity `observed` uses — take
        // the entry's parent to align the two sets.
        let existing: HashSet<String> = WalkDir::new(&drive_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() != crate::sidecar::SIDECAR_FILE_NAME)
            .filter_map(|e| {
                let parent = e.path().parent()?;
                let rel = parent.strip_prefix(&self.config.local_root).ok()?;
                Some(rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();

        for deleted in existing.difference(&observed) {
            if let Err(e) = self.archive.archive(deleted) {
                crate::logging::error(format!("Error archiving {deleted}: {e}"));
                continue;
            }
            crate::logging::info(format!("Saved outdated file: {deleted}"));
            if self.config.prune {
                if let Err(e) = self.archive.delete_original(deleted) {
                    crate::logging::error(format!("Error deleting {deleted}: {e}"));
                } else {
                    crate::logging::info(format!("Deleted from official repository: {deleted}"));
                }
            }
        }
    }

    pub fn local_root(&self) -> &PathBuf {
        &self.config.local_root
    }
}
