//! frm-backend-google
//!
//! Google Compute Engine route table (Compute v1 REST). This crate IS the live
//! HTTP adapter: it only moves routes by name. Naming and diffing live in
//! `frm-reconcile`; wrap the table in [`frm_reconcile::TableBackend`] to get a
//! full `RouteBackend`.

mod metadata;

use async_trait::async_trait;
use frm_config::GoogleSection;
use frm_reconcile::{list_filter, BackendError, RouteTable, TableBackend};
use frm_schemas::{LiveRoute, NewRoute};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

pub use metadata::{MetadataClient, DEFAULT_METADATA_BASE_URL};

pub const DEFAULT_COMPUTE_BASE_URL: &str = "https://compute.googleapis.com";

/// Route table of one GCE network.
#[derive(Debug)]
pub struct GoogleRouteTable {
    project: String,
    network: String,
    api_base_url: String,
    http: reqwest::Client,
    metadata: MetadataClient,
    network_link: OnceCell<String>,
}

/// The `RouteBackend` the daemon runs with `--backend google`.
pub type GoogleRouteBackend = TableBackend<GoogleRouteTable>;

impl GoogleRouteTable {
    /// Resolve project and network (from config, else metadata) and build the
    /// table. Unset URLs fall back to the public Google endpoints.
    pub async fn from_config(cfg: &GoogleSection) -> Result<Self, BackendError> {
        let http = reqwest::Client::new();
        let metadata = MetadataClient::new(
            cfg.metadata_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_METADATA_BASE_URL.to_string()),
            http.clone(),
        );

        let project = match &cfg.project {
            Some(p) => p.clone(),
            None => metadata.project_id().await?,
        };
        let network = match &cfg.network {
            Some(n) => n.clone(),
            None => metadata.network().await?,
        };

        Ok(Self {
            project,
            network,
            api_base_url: cfg
                .api_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPUTE_BASE_URL.to_string()),
            http,
            metadata,
            network_link: OnceCell::new(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn project_url(&self) -> String {
        format!(
            "{}/compute/v1/projects/{}",
            self.api_base_url.trim_end_matches('/'),
            self.project
        )
    }

    fn routes_url(&self) -> String {
        format!("{}/global/routes", self.project_url())
    }

    fn route_url(&self, name: &str) -> String {
        format!("{}/{}", self.routes_url(), name)
    }

    async fn authed(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let token = self.metadata.access_token().await?;
        req.bearer_auth(token)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("compute request failed: {e}")))
    }

    /// Self link of the network, fetched once.
    async fn network_link(&self) -> Result<&str, BackendError> {
        self.network_link
            .get_or_try_init(|| async {
                let url = format!("{}/global/networks/{}", self.project_url(), self.network);
                let resp = self.authed(self.http.get(url)).await?;
                let net: ComputeNetwork = read_json(resp, &self.network).await?;
                Ok::<String, BackendError>(net.self_link)
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl RouteTable for GoogleRouteTable {
    fn provider(&self) -> &'static str {
        "google"
    }

    fn network(&self) -> &str {
        &self.network
    }

    async fn list_routes(&self, name_prefix: &str) -> Result<Vec<LiveRoute>, BackendError> {
        let filter = list_filter(&self.network);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("filter", filter.as_str())];
            if let Some(t) = page_token.as_deref() {
                query.push(("pageToken", t));
            }
            let resp = self
                .authed(self.http.get(self.routes_url()).query(&query))
                .await?;
            let page: ComputeRouteList = read_json(resp, "routes").await?;

            out.extend(
                page.items
                    .into_iter()
                    .filter(|r| r.name.starts_with(name_prefix))
                    .map(ComputeRoute::into_live),
            );

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        debug!(network = %self.network, count = out.len(), "listed routes");
        Ok(out)
    }

    async fn get_route(&self, name: &str) -> Result<Option<LiveRoute>, BackendError> {
        let resp = self.authed(self.http.get(self.route_url(name))).await?;
        match read_json::<ComputeRoute>(resp, name).await {
            Ok(r) => Ok(Some(r.into_live())),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_route(&self, route: &NewRoute) -> Result<(), BackendError> {
        let body = ComputeRouteInsert {
            name: route.name.clone(),
            dest_range: route.dest_range.to_string(),
            network: self.network_link().await?.to_string(),
            next_hop_ip: route.next_hop_ip.to_string(),
            priority: route.priority,
            tags: Vec::new(),
        };
        let resp = self
            .authed(self.http.post(self.routes_url()).json(&body))
            .await?;
        check_status(resp, &route.name).await
    }

    async fn delete_route(&self, name: &str) -> Result<(), BackendError> {
        let resp = self.authed(self.http.delete(self.route_url(name))).await?;
        check_status(resp, name).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoute {
    name: String,
    #[serde(default)]
    dest_range: String,
    /// Absent for routes that hop via an instance or gateway instead of an ip.
    #[serde(default)]
    next_hop_ip: String,
}

impl ComputeRoute {
    fn into_live(self) -> LiveRoute {
        LiveRoute::new(self.name, self.dest_range, self.next_hop_ip)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRouteList {
    #[serde(default)]
    items: Vec<ComputeRoute>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRouteInsert {
    name: String,
    dest_range: String,
    network: String,
    next_hop_ip: String,
    priority: u32,
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeNetwork {
    self_link: String,
}

#[derive(Debug, Deserialize)]
struct ComputeErrorEnvelope {
    error: ComputeError,
}

#[derive(Debug, Deserialize)]
struct ComputeError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ComputeErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ComputeErrorItem {
    #[serde(default)]
    reason: String,
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

/// Map a non-success compute response onto the backend error taxonomy.
fn classify(status: u16, body: &str, subject: &str) -> BackendError {
    let (message, reasons) = match serde_json::from_str::<ComputeErrorEnvelope>(body) {
        Ok(env) => (
            env.error.message,
            env.error.errors.into_iter().map(|e| e.reason).collect(),
        ),
        Err(_) => (body.trim().to_string(), Vec::new()),
    };
    let rate_limited = reasons
        .iter()
        .any(|r| r == "rateLimitExceeded" || r == "userRateLimitExceeded");

    match status {
        404 => BackendError::NotFound(subject.to_string()),
        409 => BackendError::Conflict(subject.to_string()),
        429 => BackendError::RateLimited(message),
        403 if rate_limited => BackendError::RateLimited(message),
        s if s >= 500 => BackendError::Unavailable(format!("compute http {s}: {message}")),
        s => BackendError::Api {
            code: Some(s),
            message,
        },
    }
}

async fn check_status(resp: reqwest::Response, subject: &str) -> Result<(), BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status.as_u16(), &body, subject))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    subject: &str,
) -> Result<T, BackendError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| BackendError::Unavailable(format!("compute response read failed: {e}")))?;
    if !status.is_success() {
        return Err(classify(status.as_u16(), &body, subject));
    }
    serde_json::from_str(&body)
        .map_err(|e| BackendError::Decode(format!("compute response decode failed: {e}")))
}
