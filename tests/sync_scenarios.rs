//! End-to-end scenarios against an in-process fake `RemoteGateway`: cold
//! mirror, unchanged rerun, updated content, remote deletion under both
//! archive-only and prune policies, a mid-batch download failure, and
//! cancellation mid-download.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use graphmirror::config::SyncConfig;
use graphmirror::gateway::{GatewayError, RemoteGateway};
use graphmirror::model::{Drive, PendingEntry, RemoteItem, ResolvedItem};
use graphmirror::orchestrator::SyncOrchestrator;

#[derive(Clone)]
struct FakeItemSpec {
    id: String,
    name: String,
    size: i64,
    url: Option<String>,
    created_date: Option<String>,
    hash: Option<String>,
    content: Vec<u8>,
}

struct FakeGateway {
    drives: Vec<Drive>,
    children: Mutex<HashMap<String, Vec<RemoteItem>>>,
    specs: Mutex<HashMap<String, FakeItemSpec>>,
    fail_stream_once: Mutex<HashSet<String>>,
    stream_attempts: Mutex<HashMap<String, usize>>,
    cancel_on_item: Mutex<Option<(String, CancellationToken)>>,
    stream_calls: AtomicUsize,
}

impl FakeGateway {
    fn new(drives: Vec<Drive>) -> Self {
        Self {
            drives,
            children: Mutex::new(HashMap::new()),
            specs: Mutex::new(HashMap::new()),
            fail_stream_once: Mutex::new(HashSet::new()),
            stream_attempts: Mutex::new(HashMap::new()),
            cancel_on_item: Mutex::new(None),
            stream_calls: AtomicUsize::new(0),
        }
    }

    fn set_children(&self, item_id: &str, items: Vec<FakeItemSpec>) {
        let remote_items: Vec<RemoteItem> = items
            .iter()
            .map(|s| RemoteItem {
                id: s.id.clone(),
                name: s.name.clone(),
                is_folder: false,
                web_url: s.url.clone(),
                created_date: s.created_date.clone(),
                size: Some(s.size),
                quick_xor_hash: None,
            })
            .collect();
        self.children.lock().unwrap().insert(item_id.to_string(), remote_items);
        let mut specs = self.specs.lock().unwrap();
        for item in items {
            specs.insert(item.id.clone(), item);
        }
    }

    fn fail_once(&self, item_id: &str) {
        self.fail_stream_once.lock().unwrap().insert(item_id.to_string());
    }

    fn cancel_on(&self, item_id: &str, cancel: CancellationToken) {
        *self.cancel_on_item.lock().unwrap() = Some((item_id.to_string(), cancel));
    }
}

#[async_trait::async_trait]
impl RemoteGateway for FakeGateway {
    async fn list_drives(&self, _site_id: &str) -> Result<Vec<Drive>, GatewayError> {
        Ok(self.drives.clone())
    }

    async fn list_children(&self, _drive_id: &str, item_id: &str) -> Result<Vec<RemoteItem>, GatewayError> {
        Ok(self.children.lock().unwrap().get(item_id).cloned().unwrap_or_default())
    }

    async fn batch_resolve(
        &self,
        entries: &[PendingEntry],
    ) -> Result<HashMap<usize, ResolvedItem>, GatewayError> {
        let specs = self.specs.lock().unwrap();
        let mut out = HashMap::new();
        for (j, entry) in entries.iter().enumerate() {
            let Some(spec) = specs.get(&entry.item.id) else {
                continue;
            };
            out.insert(
                j,
                ResolvedItem {
                    pending: entry.clone(),
                    download_url: Some(format!("fake://{}", spec.id)),
                    size: spec.size,
                    quick_xor_hash: spec.hash.clone(),
                },
            );
        }
        Ok(out)
    }

    async fn stream_content(
        &self,
        download_url: Option<&str>,
        _drive_id: &str,
        item_id: &str,
    ) -> Result<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Unpin>, GatewayError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        if let Some((target, cancel)) = self.cancel_on_item.lock().unwrap().clone() {
            if target == item_id {
                cancel.cancel();
            }
        }

        if self.fail_stream_once.lock().unwrap().remove(item_id) {
            let mut attempts = self.stream_attempts.lock().unwrap();
            *attempts.entry(item_id.to_string()).or_insert(0) += 1;
            return Err(GatewayError::DownloadHttp(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let url = download_url.expect("fake gateway always resolves a download_url");
        let id = url.strip_prefix("fake://").expect("fake url shape");
        let specs = self.specs.lock().unwrap();
        let spec = specs.get(id).expect("resolved id must have a spec");
        let body: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from(spec.content.clone()))];
        Ok(Box::new(stream::iter(body)))
    }
}

fn scratch_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("graphmirror-scenario-{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn base_config(local_root: PathBuf, drives: Vec<String>) -> SyncConfig {
    SyncConfig {
        site_id: "site".to_string(),
        local_root,
        tenant_id: "tenant".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        drives,
        enable_logging: false,
        log_level: graphmirror::config::LogLevel::Info,
        prune: false,
        graph_base_url: "https://example.invalid".to_string(),
        batch_limit: 20,
        worker_limit: 1,
        chunk_size: 64 * 1024,
    }
}

fn mirrored_file(root: &std::path::Path, rel: &str) -> PathBuf {
    root.join(rel).join(rel.rsplit('/').next().unwrap())
}

#[tokio::test]
async fn cold_mirror_downloads_new_file() {
    let root = scratch_root("cold-mirror");
    let gateway = Arc::new(FakeGateway::new(vec![Drive {
        id: "d1".to_string(),
        name: "D".to_string(),
    }]));
    gateway.set_children(
        "root",
        vec![FakeItemSpec {
            id: "f1".to_string(),
            name: "a.txt".to_string(),
            size: 13,
            url: Some("u1".to_string()),
            created_date: Some("2024-01-02".to_string()),
            hash: None,
            content: b"hello, world!".to_vec(),
        }],
    );

    let config = base_config(root.clone(), vec!["D".to_string()]);
    let mut orch = SyncOrchestrator::new(config, gateway, "2024-01-02T00-00-00".to_string(), CancellationToken::new());
    orch.select_drives().await.unwrap();
    orch.run().await.unwrap();

    let file = mirrored_file(&root, "D/a.txt");
    assert_eq!(std::fs::read(&file).unwrap(), b"hello, world!");
    let sidecar = std::fs::read_to_string(file.parent().unwrap().join("metadata.json")).unwrap();
    assert!(sidecar.contains("\"size\": 13"));
    assert!(sidecar.contains("\"original_path\": \"D/a.txt\""));
    assert!(sidecar.contains("\"url\": \"u1\""));
    assert!(sidecar.contains("\"creation_date\": \"2024-01-02\""));
}

#[tokio::test]
async fn unchanged_rerun_does_not_rewrite_sidecar() {
    let root = scratch_root("unchanged-rerun");
    let gateway = Arc::new(FakeGateway::new(vec![Drive {
        id: "d1".to_string(),
        name: "D".to_string(),
    }]));
    gateway.set_children(
        "root",
        vec![FakeItemSpec {
            id: "f1".to_string(),
            name: "a.txt".to_string(),
            size: 13,
            url: Some("u1".to_string()),
            created_date: Some("2024-01-02".to_string()),
            hash: None,
            content: b"hello, world!".to_vec(),
        }],
    );

    let config = base_config(root.clone(), vec!["D".to_string()]);
    let mut orch = SyncOrchestrator::new(
        config.clone(),
        gateway.clone(),
        "2024-01-02T00-00-00".to_string(),
        CancellationToken::new(),
    );
    orch.select_drives().await.unwrap();
    orch.run().await.unwrap();

    let file = mirrored_file(&root, "D/a.txt");
    let sidecar_path = file.parent().unwrap().join("metadata.json");
    let before = std::fs::read_to_string(&sidecar_path).unwrap();

    let mut orch2 = SyncOrchestrator::new(config, gateway, "2024-01-03T00-00-00".to_string(), CancellationToken::new());
    orch2.select_drives().await.unwrap();
    orch2.run().await.unwrap();

    let after = std::fs::read_to_string(&sidecar_path).unwrap();
    assert_eq!(before, after);
    assert!(!root.join("saves/2024-01-03T00-00-00").exists());
}

#[tokio::test]
async fn updated_content_archives_old_bytes_and_writes_new() {
    let root = scratch_root("updated-content");
    let gateway = Arc::new(FakeGateway::new(vec![Drive {
        id: "d1".to_string(),
        name: "D".to_string(),
    }]));
    gateway.set_children(
        "root",
        vec![FakeItemSpec {
            id: "f1".to_string(),
            name: "a.txt".to_string(),
            size: 13,
            url: Some("u1".to_string()),
            created_date: Some("2024-01-02".to_string()),
            hash: None,
            content: b"hello, world!".to_vec(),
        }],
    );
    let config = base_config(root.clone(), vec!["D".to_string()]);
    let mut orch = SyncOrchestrator::new(
        config.clone(),
        gateway.clone(),
        "2024-01-02T00-00-00".to_string(),
        CancellationToken::new(),
    );
    orch.select_drives().await.unwrap();
    orch.run().await.unwrap();

    gateway.set_children(
        "root",
        vec![FakeItemSpec {
            id: "f1".to_string(),
            name: "a.txt".to_string(),
            size: 5,
            url: Some("u1".to_string()),
            created_date: Some("2024-01-03".to_string()),
            hash: None,
            content: b"world".to_vec(),
        }],
    );
    let mut orch2 = SyncOrchestrator::new(config, gateway, "2024-01-03T00-00-00".to_string(), CancellationToken::new());
    orch2.select_drives().await.unwrap();
    orch2.run().await.unwrap();

    let archived = root.join("saves/2024-01-03T00-00-00/D/a.txt/a.txt");
    assert_eq!(std::fs::read(&archived).unwrap(), b"hello, world!");
    let current = mirrored_file(&root, "D/a.txt");
    assert_eq!(std::fs::read(&current).unwrap(), b"world");
}

#[tokio::test]
async fn remote_deletion_respects_prune_flag() {
    for prune in [false, true] {
        let root = scratch_root(if prune { "deletion-prune" } else { "deletion-archive-only" });
        let gateway = Arc::new(FakeGateway::new(vec![Drive {
            id: "d1".to_string(),
            name: "D".to_string(),
        }]));
        gateway.set_children(
            "root",
            vec![FakeItemSpec {
                id: "f1".to_string(),
                name: "a.txt".to_string(),
                size: 13,
                url: Some("u1".to_string()),
                created_date: Some("2024-01-02".to_string()),
                hash: None,
                content: b"hello, world!".to_vec(),
            }],
        );
        let mut config = base_config(root.clone(), vec!["D".to_string()]);
        config.prune = prune;
        let mut orch = SyncOrchestrator::new(
            config.clone(),
            gateway.clone(),
            "2024-01-02T00-00-00".to_string(),
            CancellationToken::new(),
        );
        orch.select_drives().await.unwrap();
        orch.run().await.unwrap();

        gateway.set_children("root", vec![]);
        let mut orch2 = SyncOrchestrator::new(config, gateway, "2024-01-03T00-00-00".to_string(), CancellationToken::new());
        orch2.select_drives().await.unwrap();
        orch2.run().await.unwrap();

        let archived = root.join("saves/2024-01-03T00-00-00/D/a.txt/a.txt");
        assert_eq!(std::fs::read(&archived).unwrap(), b"hello, world!");
        let current = mirrored_file(&root, "D/a.txt");
        assert_eq!(current.exists(), !prune);
    }
}

#[tokio::test]
async fn batch_partial_failure_single_item_requeued_and_retried() {
    let root = scratch_root("batch-partial-failure");
    let gateway = Arc::new(FakeGateway::new(vec![Drive {
        id: "d1".to_string(),
        name: "D".to_string(),
    }]));
    let items: Vec<FakeItemSpec> = (0..20)
        .map(|i| FakeItemSpec {
            id: format!("f{i}"),
            name: format!("{i}.txt"),
            size: 4,
            url: Some(format!("u{i}")),
            created_date: Some("2024-01-02".to_string()),
            hash: None,
            content: format!("c{i:02}").into_bytes(),
        })
        .collect();
    gateway.set_children("root", items);
    gateway.fail_once("f7");

    let config = base_config(root.clone(), vec!["D".to_string()]);
    let mut orch = SyncOrchestrator::new(config, gateway, "2024-01-02T00-00-00".to_string(), CancellationToken::new());
    orch.select_drives().await.unwrap();
    orch.run().await.unwrap();

    for i in 0..20 {
        let file = mirrored_file(&root, &format!("D/{i}.txt"));
        assert!(file.exists(), "item {i} should be present after retry");
        assert_eq!(std::fs::read(&file).unwrap(), format!("c{i:02}").into_bytes());
    }
}

#[tokio::test]
async fn sigint_mid_download_requeues_remaining_items() {
    let root = scratch_root("sigint-mid-download");
    let gateway = Arc::new(FakeGateway::new(vec![Drive {
        id: "d1".to_string(),
        name: "D".to_string(),
    }]));
    let items: Vec<FakeItemSpec> = (0..20)
        .map(|i| FakeItemSpec {
            id: format!("f{i}"),
            name: format!("{i}.txt"),
            size: 4,
            url: Some(format!("u{i}")),
            created_date: Some("2024-01-02".to_string()),
            hash: None,
            content: format!("c{i:02}").into_bytes(),
        })
        .collect();
    gateway.set_children("root", items);

    let cancel = CancellationToken::new();
    gateway.cancel_on("f10", cancel.clone());

    let config = base_config(root.clone(), vec!["D".to_string()]);
    let mut orch = SyncOrchestrator::new(config, gateway, "2024-01-02T00-00-00".to_string(), cancel);
    orch.select_drives().await.unwrap();
    let result = orch.run().await;
    assert!(matches!(result, Err(GatewayError::Cancelled)));

    for i in 0..10 {
        let file = mirrored_file(&root, &format!("D/{i}.txt"));
        assert!(file.exists(), "item {i} should be finalized before cancellation");
    }
    for i in 10..20 {
        let file = mirrored_file(&root, &format!("D/{i}.txt"));
        assert!(!file.exists(), "item {i} should not be finalized after cancellation");
    }
}
