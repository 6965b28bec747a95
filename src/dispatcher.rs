//! Drains the pending queue in fixed-size batches, resolves per-item
//! download URLs against the batch endpoint, streams downloads, and
//! requeues work that could not be finished this pass. The heart of the
//! sync engine.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveStore;
use crate::change::ChangePredicate;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::model::PendingEntry;

pub struct BatchDispatcher {
    gateway: Arc<dyn RemoteGateway>,
    archive: Arc<ArchiveStore>,
    local_root: PathBuf,
    batch_limit: usize,
    chunk_size: usize,
    change_predicate: ChangePredicate,
    cancel: CancellationToken,
    /// Relative paths observed (SKIP or downloaded) during this drive's
    /// run, consulted by the orchestrator's deletion reconciliation.
    observed: Arc<Mutex<HashSet<String>>>,
}

impl BatchDispatcher {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        archive: Arc<ArchiveStore>,
        local_root: PathBuf,
        batch_limit: usize,
        chunk_size: usize,
        change_predicate: ChangePredicate,
        cancel: CancellationToken,
        observed: Arc<Mutex<HashSet<String>>>,
    ) -> Self {
        Self {
            gateway,
            archive,
            local_root,
            batch_limit,
            chunk_size,
            change_predicate,
            cancel,
            observed,
        }
    }

    /// `final=false`: drain one whole batch only if the queue already
    /// holds at least `batch_limit` entries (opportunistic, called
    /// between folders during the walk). `final=true`: drain every
    /// remaining batch until the queue is empty (called once the walk
    /// for a drive has finished).
    pub async fn maybe_drain(
        &self,
        queue: &mut VecDeque<PendingEntry>,
        final_drain: bool,
    ) -> Result<(), GatewayError> {
        loop {
            if !final_drain && queue.len() < self.batch_limit {
                return Ok(());
            }
            if queue.is_empty() {
                return Ok(());
            }
            let take = self.batch_limit.min(queue.len());
            let batch: Vec<PendingEntry> = queue.drain(..take).collect();

            match self.process_batch(batch, queue).await {
                Ok(()) => {}
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(_) => {}
            }

            if !final_drain {
                return Ok(());
            }
        }
    }

    async fn process_batch(
        &self,
        batch: Vec<PendingEntry>,
        queue: &mut VecDeque<PendingEntry>,
    ) -> Result<(), GatewayError> {
        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                crate::logging::error("process_batch cancelled during batch POST; re-queueing batch");
                requeue_head(queue, batch);
                return Err(GatewayError::Cancelled);
            }
            result = self.gateway.batch_resolve(&batch) => result,
        };

        let resolved = match resolved {
            Ok(map) => map,
            Err(GatewayError::Token) => {
                crate::logging::error("process_batch failed to obtain token; re-queueing batch");
                requeue_head(queue, batch);
                return Ok(());
            }
            // Transport/timeout/unexpected batch errors: the entries become
            // unresolved for this pass rather than requeued, per the
            // source's documented (if debatable) default behavior.
            Err(_) => Default::default(),
        };

        for (j, entry) in batch.iter().enumerate() {
            let folder_rel = entry.folder_rel();
            let full_folder = self.local_root.join(&folder_rel);
            let full_file = full_folder.join(&entry.item.name);

            let Some(item) = resolved.get(&j) else {
                continue;
            };

            let changed = self.change_predicate.is_changed(
                &full_file,
                item.size,
                item.quick_xor_hash.as_deref(),
                entry.item.web_url.as_deref(),
                entry.item.created_date.as_deref(),
                &folder_rel,
            );
            if !changed {
                crate::logging::info(format!("SKIP --- File {folder_rel} up to date"));
                self.observed.lock().await.insert(folder_rel.clone());
                continue;
            }

            let stream_result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    crate::logging::error("Download cancelled; re-queueing remaining items");
                    requeue_head(queue, batch[j..].to_vec());
                    return Err(GatewayError::Cancelled);
                }
                result = self.gateway.stream_content(
                    item.download_url.as_deref(),
                    &entry.drive_id,
                    &entry.item.id,
                ) => result,
            };

            let mut stream = match stream_result {
                Ok(s) => s,
                Err(GatewayError::DownloadHttp(status)) => {
                    crate::logging::error(format!("Failed to download {folder_rel}: {status}"));
                    queue.push_back(entry.clone());
                    continue;
                }
                Err(_) => {
                    crate::logging::error(format!("Error downloading {folder_rel}"));
                    requeue_head(queue, batch[j..].to_vec());
                    return Ok(());
                }
            };

            if let Err(e) = tokio::fs::create_dir_all(&full_folder).await {
                crate::logging::error(format!("Error creating {}: {e}", full_folder.display()));
                requeue_head(queue, batch[j..].to_vec());
                return Ok(());
            }

            let is_update = full_file.exists();
            if is_update {
                crate::logging::info(format!("UPDATE --- File {folder_rel} outdated, updating..."));
                if let Err(e) = self.archive.archive(&folder_rel) {
                    crate::logging::error(format!("Error archiving {folder_rel}: {e}"));
                }
            } else {
                crate::logging::info(format!("INSERT --- File {folder_rel} new, inserting..."));
            }

            let tmp_path = full_folder.join(format!(".{}.tmp-{}", entry.item.name, now_nanos()));
            let write_result = write_stream_chunked(&mut stream, &tmp_path, self.chunk_size, &self.cancel).await;

            match write_result {
                Ok(()) => {
                    if let Err(e) = tokio::fs::rename(&tmp_path, &full_file).await {
                        crate::logging::error(format!("Error finalizing {folder_rel}: {e}"));
                        let _ = tokio::fs::remove_file(&tmp_path).await;
                        requeue_head(queue, batch[j..].to_vec());
                        return Ok(());
                    }
                }
                Err(WriteOutcome::Cancelled) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    crate::logging::error("Download cancelled; re-queueing remaining items");
                    requeue_head(queue, batch[j..].to_vec());
                    return Err(GatewayError::Cancelled);
                }
                Err(WriteOutcome::Io(e)) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    crate::logging::error(format!("Error downloading {folder_rel}: {e}"));
                    requeue_head(queue, batch[j..].to_vec());
                    return Ok(());
                }
            }

            let sidecar = crate::sidecar::Sidecar {
                size: item.size,
                original_path: folder_rel.clone(),
                xor_hash: item.quick_xor_hash.clone(),
                url: entry.item.web_url.clone(),
                creation_date: entry.item.created_date.clone(),
            };
            if let Err(e) = crate::sidecar::write(&full_folder, &sidecar) {
                crate::logging::error(format!("Error writing sidecar for {folder_rel}: {e}"));
            }
            self.observed.lock().await.insert(folder_rel.clone());
        }

        Ok(())
    }
}

fn requeue_head(queue: &mut VecDeque<PendingEntry>, batch_tail: Vec<PendingEntry>) {
    for entry in batch_tail.into_iter().rev() {
        queue.push_front(entry);
    }
}

enum WriteOutcome {
    Cancelled,
    Io(std::io::Error),
}

async fn write_stream_chunked(
    stream: &mut Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + Unpin>,
    path: &std::path::Path,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<(), WriteOutcome> {
    let mut file = tokio::fs::File::create(path).await.map_err(WriteOutcome::Io)?;
    let mut buffer = Vec::with_capacity(chunk_size);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WriteOutcome::Cancelled),
            chunk = stream.next() => chunk,
        };
        match next {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while buffer.len() >= chunk_size {
                    let rest = buffer.split_off(chunk_size);
                    file.write_all(&buffer).await.map_err(WriteOutcome::Io)?;
                    buffer = rest;
                }
            }
            Some(Err(e)) => {
                return Err(WriteOutcome::Io(std::io::Error::new(std::io::ErrorKind::Other, e)));
            }
            None => break,
        }
    }
    if !buffer.is_empty() {
        file.write_all(&buffer).await.map_err(WriteOutcome::Io)?;
    }
    file.flush().await.map_err(WriteOutcome::Io)?;
    Ok(())
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
