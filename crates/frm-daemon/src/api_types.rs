//! Response types for the frm-daemon status endpoints.
//!
//! `Serialize + Deserialize` so they can be JSON-encoded by Axum and decoded
//! by tests. No logic lives here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    /// Newest store index the routes are known to reflect.
    pub last_seen_index: u64,
    pub full_syncs_ok: u64,
    pub full_syncs_failed: u64,
    pub events_applied: u64,
    pub events_skipped: u64,
    pub last_sync_at_ms: Option<i64>,
    pub last_error: Option<String>,
    /// "full-resync" | "incremental"
    pub watch_policy: String,
}
