//! Axum router for the read-only status surface.
//!
//! Middleware (tracing) is attached in `main.rs` so tests can drive the bare
//! router.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};

use crate::{
    api_types::{HealthResponse, StatusResponse},
    state::{uptime_secs, AppState},
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let s = st.engine.read().await.clone();
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            last_seen_index: s.last_seen_index,
            full_syncs_ok: s.full_syncs_ok,
            full_syncs_failed: s.full_syncs_failed,
            events_applied: s.events_applied,
            events_skipped: s.events_skipped,
            last_sync_at_ms: s.last_sync_at_ms,
            last_error: s.last_error,
            watch_policy: s.watch_policy,
        }),
    )
}
