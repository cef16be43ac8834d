//! HTTP client for Catalyst content servers
//!
//! Requests go to the configured content servers in order; the first
//! server that answers wins (failover, not load balancing). Streams pin
//! themselves to the server that served their first page.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ContentClient, DeploymentStream};
use crate::types::{
    DeploymentEvent, ProfileEntity, Result, SnapshotMetadata, SyncError, PROFILE_ENTITY_TYPE,
};

/// Content network endpoints
#[derive(Debug, Clone)]
pub struct CatalystConfig {
    pub content_servers: Vec<String>,
    pub lambdas_url: String,
    /// Per-request timeout (individual pages, not whole streams)
    pub request_timeout: Duration,
}

impl Default for CatalystConfig {
    fn default() -> Self {
        Self {
            content_servers: vec!["https://peer.decentraland.org/content".to_string()],
            lambdas_url: "https://peer.decentraland.org/lambdas".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct IdsRequest<'a> {
    ids: &'a [String],
}

#[derive(Deserialize)]
struct PointerChangesPage {
    #[serde(default)]
    deltas: Vec<DeploymentEvent>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    more_data: bool,
    /// Relative query string for the next page
    #[serde(default)]
    next: Option<String>,
}

/// Catalyst implementation of [`ContentClient`]
#[derive(Clone)]
pub struct CatalystClient {
    http: reqwest::Client,
    servers: Arc<Vec<String>>,
    lambdas_url: Arc<String>,
}

impl CatalystClient {
    pub fn new(config: CatalystConfig) -> Result<Self> {
        let servers: Vec<String> = config
            .content_servers
            .iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            return Err(SyncError::Config("at least one content server is required".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("profile-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            servers: Arc::new(servers),
            lambdas_url: Arc::new(config.lambdas_url.trim_end_matches('/').to_string()),
        })
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await?;
        Ok(check_status(url, response)?.json::<T>().await?)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.http.post(url).json(body).send().await?;
        Ok(check_status(url, response)?.json::<T>().await?)
    }

    /// GET `path` from each content server in turn; returns the answering server too
    async fn get_with_failover<T: DeserializeOwned>(&self, path: &str) -> Result<(String, T)> {
        let mut last_error = None;
        for server in self.servers.iter() {
            let url = format!("{}{}", server, path);
            match self.get_json::<T>(&url).await {
                Ok(value) => return Ok((server.clone(), value)),
                Err(e) => {
                    warn!(server = %server, path, error = %e, "Content server request failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::Config("no content servers".into())))
    }

    async fn post_with_failover<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut last_error = None;
        for server in self.servers.iter() {
            let url = format!("{}{}", server, path);
            match self.post_json::<B, T>(&url, body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(server = %server, path, error = %e, "Content server request failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::Config("no content servers".into())))
    }

    /// Open the raw snapshot file on the first server that has it
    async fn open_snapshot(&self, hash: &str) -> Result<BoxStream<'static, reqwest::Result<Bytes>>> {
        let mut last_error: Option<SyncError> = None;
        for server in self.servers.iter() {
            let url = format!("{}/contents/{}", server, hash);
            let response = match self.http.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(e.into());
                    continue;
                }
            };
            match check_status(&url, response) {
                Ok(response) => {
                    debug!(snapshot = %hash, server = %server, "Streaming snapshot");
                    return Ok(response.bytes_stream().boxed());
                }
                Err(e) => {
                    warn!(snapshot = %hash, server = %server, error = %e, "Snapshot download failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::NotFound(format!("snapshot {}", hash))))
    }
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SyncError::NotFound(url.to_string()));
    }
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SyncError::Network(format!("HTTP {} from {}", status, url)));
    }
    Err(SyncError::Internal(format!("HTTP {} from {}", status, url)))
}

// =============================================================================
// Snapshot file decoding
// =============================================================================

/// Splits a chunked byte stream into lines
#[derive(Default)]
struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line[..pos]).trim().to_string())
    }

    /// Trailing line without a terminating newline
    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(String::from_utf8_lossy(&rest).trim().to_string())
    }
}

/// Snapshot files are newline-delimited JSON with `#` header lines
fn parse_snapshot_line(line: &str) -> Option<DeploymentEvent> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str::<DeploymentEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping malformed snapshot line");
            None
        }
    }
}

enum SnapshotRead {
    Pending(CatalystClient, String),
    Reading(BoxStream<'static, reqwest::Result<Bytes>>, LineBuffer),
    Done,
}

enum PointerChangesRead {
    /// First page: any server may answer
    Start(CatalystClient, i64),
    /// Buffered events plus the follow-up page URL, if any
    Paging {
        client: CatalystClient,
        server: String,
        buffered: VecDeque<DeploymentEvent>,
        next_url: Option<String>,
    },
    Done,
}

fn pointer_changes_path(from: i64) -> String {
    format!(
        "/pointer-changes?entityType={}&from={}&sortingOrder=ASC&sortingField=local_timestamp",
        PROFILE_ENTITY_TYPE, from
    )
}

fn next_page_url(server: &str, pagination: &Pagination) -> Option<String> {
    if !pagination.more_data {
        return None;
    }
    pagination
        .next
        .as_ref()
        .filter(|next| !next.is_empty())
        .map(|next| format!("{}/pointer-changes{}", server, next))
}

#[async_trait]
impl ContentClient for CatalystClient {
    async fn get_entities_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.post_with_failover("/entities/active", &IdsRequest { ids })
            .await
    }

    async fn get_sanitized_profiles(&self, pointers: &[String]) -> Result<Vec<ProfileEntity>> {
        if pointers.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/profiles", self.lambdas_url);
        self.post_json(&url, &IdsRequest { ids: pointers }).await
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        let (_, snapshots) = self.get_with_failover("/snapshots").await?;
        Ok(snapshots)
    }

    fn snapshot_deployments(&self, snapshot: &SnapshotMetadata) -> DeploymentStream {
        let start = SnapshotRead::Pending(self.clone(), snapshot.hash.clone());

        stream::unfold(start, |mut state| async move {
            loop {
                state = match state {
                    SnapshotRead::Pending(client, hash) => match client.open_snapshot(&hash).await {
                        Ok(body) => SnapshotRead::Reading(body, LineBuffer::default()),
                        Err(e) => return Some((Err(e), SnapshotRead::Done)),
                    },
                    SnapshotRead::Reading(mut body, mut lines) => {
                        if let Some(line) = lines.next_line() {
                            if let Some(event) = parse_snapshot_line(&line) {
                                return Some((Ok(event), SnapshotRead::Reading(body, lines)));
                            }
                            SnapshotRead::Reading(body, lines)
                        } else {
                            match body.next().await {
                                Some(Ok(chunk)) => {
                                    lines.push(&chunk);
                                    SnapshotRead::Reading(body, lines)
                                }
                                Some(Err(e)) => return Some((Err(e.into()), SnapshotRead::Done)),
                                None => {
                                    let event = lines.finish().and_then(|l| parse_snapshot_line(&l));
                                    return event.map(|e| (Ok(e), SnapshotRead::Done));
                                }
                            }
                        }
                    }
                    SnapshotRead::Done => return None,
                };
            }
        })
        .boxed()
    }

    fn pointer_changes(&self, from: i64) -> DeploymentStream {
        let start = PointerChangesRead::Start(self.clone(), from);

        stream::unfold(start, |mut state| async move {
            loop {
                state = match state {
                    PointerChangesRead::Start(client, from) => {
                        let path = pointer_changes_path(from);
                        match client.get_with_failover::<PointerChangesPage>(&path).await {
                            Ok((server, page)) => PointerChangesRead::Paging {
                                next_url: next_page_url(&server, &page.pagination),
                                buffered: page.deltas.into(),
                                client,
                                server,
                            },
                            Err(e) => return Some((Err(e), PointerChangesRead::Done)),
                        }
                    }
                    PointerChangesRead::Paging {
                        client,
                        server,
                        mut buffered,
                        next_url,
                    } => {
                        if let Some(event) = buffered.pop_front() {
                            return Some((
                                Ok(event),
                                PointerChangesRead::Paging {
                                    client,
                                    server,
                                    buffered,
                                    next_url,
                                },
                            ));
                        }
                        let Some(url) = next_url else {
                            return None;
                        };
                        match client.get_json::<PointerChangesPage>(&url).await {
                            Ok(page) => PointerChangesRead::Paging {
                                next_url: next_page_url(&server, &page.pagination),
                                buffered: page.deltas.into(),
                                client,
                                server,
                            },
                            Err(e) => return Some((Err(e), PointerChangesRead::Done)),
                        }
                    }
                    PointerChangesRead::Done => return None,
                };
            }
        })
        .boxed()
    }
}
