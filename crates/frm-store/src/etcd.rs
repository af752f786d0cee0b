//! etcd v2 HTTP client for the lease store.
//!
//! - Full read: `GET /v2/keys<prefix>?recursive=true&sorted=true`. The read
//!   index comes from the `X-Etcd-Index` header; nested directories are
//!   flattened into leaf nodes. `errorCode 100` (key not found) is an empty
//!   tree at the index the error reports.
//! - Watch: `GET /v2/keys<prefix>?wait=true&recursive=true&waitIndex=N`.
//!   `errorCode 401` means the index was compacted away. An empty body means
//!   the long poll timed out server-side and is re-issued.

use std::time::Duration;

use async_trait::async_trait;
use frm_schemas::{LeaseNode, LeaseTree, WatchAction, WatchEvent};
use serde::Deserialize;
use tracing::debug;

use crate::{LeaseStore, StoreError};

const ETCD_INDEX_HEADER: &str = "X-Etcd-Index";
const KEY_NOT_FOUND: u64 = 100;
const EVENT_INDEX_CLEARED: u64 = 401;

/// Timeout for full reads. Watches have none; they are cancelled by dropping.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Lease store backed by one etcd v2 endpoint.
#[derive(Debug, Clone)]
pub struct EtcdLeaseStore {
    endpoint: String,
    http: reqwest::Client,
}

impl EtcdLeaseStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn keys_url(&self, prefix: &str) -> String {
        format!(
            "{}/v2/keys/{}",
            self.endpoint.trim_end_matches('/'),
            prefix.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl LeaseStore for EtcdLeaseStore {
    async fn get_tree(&self, prefix: &str) -> Result<LeaseTree, StoreError> {
        let resp = self
            .http
            .get(self.keys_url(prefix))
            .query(&[("recursive", "true"), ("sorted", "true")])
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("etcd get failed: {e}")))?;

        let header_index = resp
            .headers()
            .get(ETCD_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Unavailable(format!("etcd get body read failed: {e}")))?;

        if !status.is_success() {
            let err = decode_error(status.as_u16(), &body)?;
            if err.error_code == KEY_NOT_FOUND {
                debug!(prefix, index = err.index, "lease prefix absent; treating as empty");
                return Ok(LeaseTree {
                    index: header_index.unwrap_or(err.index),
                    nodes: Vec::new(),
                });
            }
            return Err(err.into_store_error(status.as_u16()));
        }

        let parsed: EtcdResponse = serde_json::from_slice(&body)
            .map_err(|e| StoreError::Decode(format!("etcd get json decode failed: {e}")))?;

        let index = header_index.ok_or_else(|| {
            StoreError::Decode(format!("etcd get response missing {ETCD_INDEX_HEADER}"))
        })?;

        let mut nodes = Vec::new();
        if let Some(root) = parsed.node {
            flatten(root, &mut nodes);
        }
        Ok(LeaseTree { index, nodes })
    }

    async fn watch(&self, prefix: &str, from_index: u64) -> Result<WatchEvent, StoreError> {
        let wait_index = from_index.to_string();
        loop {
            let resp = self
                .http
                .get(self.keys_url(prefix))
                .query(&[
                    ("wait", "true"),
                    ("recursive", "true"),
                    ("waitIndex", wait_index.as_str()),
                ])
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(format!("etcd watch failed: {e}")))?;

            let status = resp.status();
            let body = resp.bytes().await.map_err(|e| {
                StoreError::Unavailable(format!("etcd watch body read failed: {e}"))
            })?;

            if !status.is_success() {
                let err = decode_error(status.as_u16(), &body)?;
                if err.error_code == EVENT_INDEX_CLEARED {
                    return Err(StoreError::WatchExpired {
                        requested: from_index,
                        current: err.index,
                    });
                }
                return Err(err.into_store_error(status.as_u16()));
            }

            if body.iter().all(u8::is_ascii_whitespace) {
                debug!(prefix, from_index, "etcd watch returned empty body; re-issuing");
                continue;
            }

            let parsed: EtcdResponse = serde_json::from_slice(&body)
                .map_err(|e| StoreError::Decode(format!("etcd watch json decode failed: {e}")))?;
            let node = parsed
                .node
                .ok_or_else(|| StoreError::Decode("etcd watch event has no node".to_string()))?;

            return Ok(WatchEvent {
                action: WatchAction::parse(&parsed.action),
                node: LeaseNode::new(node.key, node.value.unwrap_or_default(), node.modified_index),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: String,
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    #[serde(default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdError {
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: u64,
}

impl EtcdError {
    fn into_store_error(self, http_status: u16) -> StoreError {
        if http_status >= 500 {
            return StoreError::Unavailable(format!(
                "etcd http {http_status}: {}",
                self.describe()
            ));
        }
        StoreError::Api {
            code: self.error_code,
            message: self.describe(),
        }
    }

    fn describe(&self) -> String {
        match &self.cause {
            Some(c) => format!("{} ({c})", self.message),
            None => self.message.clone(),
        }
    }
}

fn decode_error(http_status: u16, body: &[u8]) -> Result<EtcdError, StoreError> {
    match serde_json::from_slice::<EtcdError>(body) {
        Ok(err) => Ok(err),
        Err(_) if http_status >= 500 => Err(StoreError::Unavailable(format!(
            "etcd http {http_status}: {}",
            String::from_utf8_lossy(body).trim()
        ))),
        Err(e) => Err(StoreError::Decode(format!(
            "etcd http {http_status} with undecodable error body: {e}"
        ))),
    }
}

fn flatten(node: EtcdNode, out: &mut Vec<LeaseNode>) {
    if node.dir {
        for child in node.nodes {
            flatten(child, out);
        }
        return;
    }
    out.push(LeaseNode::new(
        node.key,
        node.value.unwrap_or_default(),
        node.modified_index,
    ));
}
