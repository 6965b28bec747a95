//! Thin contract over the remote document-store API: list drives, list
//! children, issue a metadata-batch request, stream file content.
//!
//! URL shapes beyond these four operations, and credential acquisition,
//! are treated as external collaborators (spec.md §1/§6) — this module
//! depends on `CredentialProvider`, not on how tokens are obtained.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialProvider;
use crate::model::{Drive, PendingEntry, RemoteItem, ResolvedItem};

const BATCH_POST_TIMEOUT: Duration = Duration::from_secs(60);
const BATCH_JSON_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum GatewayError {
    Token,
    Transport,
    Timeout,
    BatchHttp(StatusCode),
    DownloadHttp(StatusCode),
    Cancelled,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Token => write!(f, "failed to obtain bearer token"),
            GatewayError::Transport => write!(f, "transport error"),
            GatewayError::Timeout => write!(f, "request timed out"),
            GatewayError::BatchHttp(s) => write!(f, "graph batch failed: {s}"),
            GatewayError::DownloadHttp(s) => write!(f, "download failed: {s}"),
            GatewayError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport
        }
    }
}

#[async_trait::async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list_drives(&self, site_id: &str) -> Result<Vec<Drive>, GatewayError>;
    async fn list_children(
        &self,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Vec<RemoteItem>, GatewayError>;
    /// Resolve up to `GRAPH_BATCH_LIMIT` entries in one request. The
    /// returned map is keyed by the entry's position in `entries`; a
    /// missing key means that entry was not resolved this pass (non-200
    /// batch response, or a per-entry non-200 sub-response).
    async fn batch_resolve(
        &self,
        entries: &[PendingEntry],
    ) -> Result<HashMap<usize, ResolvedItem>, GatewayError>;
    /// Streams file content from a pre-signed URL (no auth) or the
    /// authenticated content endpoint (bearer auth), depending on what
    /// `batch_resolve` returned for the entry.
    async fn stream_content(
        &self,
        download_url: Option<&str>,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Unpin>, GatewayError>;
}

pub struct GraphGateway {
    http: HttpClient,
    base_url: String,
    credentials: std::sync::Arc<dyn CredentialProvider>,
}

impl GraphGateway {
    pub fn new(base_url: impl Into<String>, credentials: std::sync::Arc<dyn CredentialProvider>) -> Self {
        let http = HttpClient::builder()
            .user_agent("graphmirror/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[derive(Deserialize)]
struct DriveListResponse {
    #[serde(default)]
    value: Vec<DriveDto>,
}

#[derive(Deserialize)]
struct DriveDto {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ChildrenResponse {
    #[serde(default)]
    value: Vec<ItemDto>,
}

#[derive(Deserialize)]
struct ItemDto {
    id: String,
    name: Option<String>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default, rename = "createdDateTime")]
    created_date_time: Option<String>,
    #[serde(default)]
    size: Option<i64>,
}

#[derive(Serialize)]
struct BatchRequest {
    requests: Vec<BatchSubRequest>,
}

#[derive(Serialize)]
struct BatchSubRequest {
    id: String,
    method: &'static str,
    url: String,
}

#[derive(Deserialize)]
struct BatchResponseEnvelope {
    #[serde(default)]
    responses: Vec<BatchSubResponse>,
}

#[derive(Deserialize)]
struct BatchSubResponse {
    id: String,
    status: u16,
    #[serde(default)]
    body: serde_json::Value,
}

#[async_trait::async_trait]
impl RemoteGateway for GraphGateway {
    async fn list_drives(&self, site_id: &str) -> Result<Vec<Drive>, GatewayError> {
        let token = self.credentials.token().await?;
        let url = format!("{}/sites/{site_id}/drives", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?;
        let body: DriveListResponse = resp.json().await?;
        Ok(body
            .value
            .into_iter()
            .filter_map(|d| match (d.id, d.name) {
                (Some(id), Some(name)) => Some(Drive { id, name }),
                _ => None,
            })
            .collect())
    }

    async fn list_children(
        &self,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Vec<RemoteItem>, GatewayError> {
        let token = self.credentials.token().await?;
        let url = format!("{}/drives/{drive_id}/items/{item_id}/children", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?;
        let body: ChildrenResponse = resp.json().await?;
        Ok(body
            .value
            .into_iter()
            .filter_map(|it| {
                let name = it.name?;
                Some(RemoteItem {
                    id: it.id,
                    name,
                    is_folder: it.folder.is_some(),
                    web_url: it.web_url,
                    created_date: it.created_date_time.map(|d| truncate_to_date(&d)),
                    size: it.size,
                    quick_xor_hash: None,
                })
            })
            .collect())
    }

    async fn batch_resolve(
        &self,
        entries: &[PendingEntry],
    ) -> Result<HashMap<usize, ResolvedItem>, GatewayError> {
        if entries.is_empty() {
            return Ok(HashMap::new());
        }
        let token = self.credentials.token().await?;

        let requests = entries
            .iter()
            .enumerate()
            .map(|(j, e)| BatchSubRequest {
                id: j.to_string(),
                method: "GET",
                url: format!(
                    "/drives/{}/items/{}?$select=id,name,size,@microsoft.graph.downloadUrl,file,hashes",
                    e.drive_id, e.item.id
                ),
            })
            .collect();

        let post = self
            .http
            .post(format!("{}/$batch", self.base_url))
            .header("Authorization", &token)
            .header("Content-Type", "application/json")
            .json(&BatchRequest { requests })
            .send();

        let resp = match tokio::time::timeout(BATCH_POST_TIMEOUT, post).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(GatewayError::Timeout),
        };

        if resp.status() != StatusCode::OK {
            crate::logging::error(format!("graph batch failed: {}", resp.status()));
            return Ok(HashMap::new());
        }

        let envelope = match tokio::time::timeout(BATCH_JSON_TIMEOUT, resp.json::<BatchResponseEnvelope>()).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => {
                crate::logging::error("error parsing batch response body");
                return Ok(HashMap::new());
            }
            Err(_) => {
                crate::logging::error("timed out reading batch JSON response");
                return Ok(HashMap::new());
            }
        };

        let mut by_id: HashMap<String, BatchSubResponse> =
            envelope.responses.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut out = HashMap::new();
        for (j, entry) in entries.iter().enumerate() {
            let Some(sub) = by_id.remove(&j.to_string()) else {
                continue;
            };
            if sub.status != 200 {
                continue;
            }
            let download_url = sub
                .body
                .get("@microsoft.graph.downloadUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let size = sub
                .body
                .get("size")
                .and_then(|v| v.as_i64())
                .or(entry.item.size)
                .unwrap_or(0);
            let quick_xor_hash = sub
                .body
                .get("file")
                .and_then(|f| f.get("hashes"))
                .or_else(|| sub.body.get("hashes"))
                .and_then(|h| h.get("quickXorHash"))
                .and_then(|v| v.as_str())
                .map(str::to_string);

            out.insert(
                j,
                ResolvedItem {
                    pending: entry.clone(),
                    download_url,
                    size,
                    quick_xor_hash,
                },
            );
        }
        Ok(out)
    }

    async fn stream_content(
        &self,
        download_url: Option<&str>,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Unpin>, GatewayError> {
        let resp = if let Some(url) = download_url {
            self.http.get(url).send().await?
        } else {
            let token = self.credentials.token().await?;
            let url = format!("{}/drives/{drive_id}/items/{item_id}/content", self.base_url);
            self.http.get(&url).header("Authorization", token).send().await?
        };
        match resp.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(Box::new(resp.bytes_stream())),
            status => Err(GatewayError::DownloadHttp(status)),
        }
    }
}

fn truncate_to_date(datetime: &str) -> String {
    datetime.split('T').next().unwrap_or(datetime).to_string()
}
