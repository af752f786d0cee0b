//! GCE metadata server access: project id, network name, and the default
//! service account's access token.

use std::time::{Duration, Instant};

use frm_reconcile::BackendError;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_METADATA_BASE_URL: &str = "http://169.254.169.254/computeMetadata/v1";

/// Refresh this long before the metadata server says the token expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client for the instance metadata server.
#[derive(Debug)]
pub struct MetadataClient {
    base_url: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            token: Mutex::new(None),
        }
    }

    async fn get(&self, path: &str) -> Result<String, BackendError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("metadata request {path} failed: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            BackendError::Unavailable(format!("metadata response {path} read failed: {e}"))
        })?;
        if !status.is_success() {
            return Err(BackendError::Api {
                code: Some(status.as_u16()),
                message: format!("metadata {path}: {}", body.trim()),
            });
        }
        Ok(body.trim().to_string())
    }

    pub async fn project_id(&self) -> Result<String, BackendError> {
        self.get("/project/project-id").await
    }

    /// Name of the network attached to the first interface.
    pub async fn network(&self) -> Result<String, BackendError> {
        let full = self.get("/instance/network-interfaces/0/network").await?;
        // "projects/123456/networks/default" -> "default"
        Ok(full.rsplit('/').next().unwrap_or_default().to_string())
    }

    /// Bearer token for the default service account, cached until shortly
    /// before it expires.
    pub async fn access_token(&self) -> Result<String, BackendError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() < t.refresh_at {
                return Ok(t.access_token.clone());
            }
        }

        let raw = self.get("/instance/service-accounts/default/token").await?;
        let parsed: TokenResponse = serde_json::from_str(&raw)
            .map_err(|e| BackendError::Decode(format!("metadata token decode failed: {e}")))?;
        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        debug!(expires_in = parsed.expires_in, "refreshed access token");

        let token = parsed.access_token.clone();
        *cached = Some(CachedToken {
            access_token: parsed.access_token,
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token)
    }
}
