//! Shared state for the status server.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The engine owns the
//! status counters; the server only reads them.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::engine::{EngineStatus, SharedStatus};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Live engine counters.
    pub engine: SharedStatus,
}

impl AppState {
    pub fn new(engine: SharedStatus) -> Self {
        start_uptime_clock();
        Self {
            build: BuildInfo {
                service: "frm-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
        }
    }

    /// State not attached to any engine; every counter reads zero.
    pub fn detached() -> Self {
        Self::new(Arc::new(RwLock::new(EngineStatus::default())))
    }
}

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Pin the uptime origin. Later calls are no-ops.
pub fn start_uptime_clock() {
    PROCESS_START.get_or_init(Instant::now);
}

/// Seconds since [`start_uptime_clock`] first ran.
pub fn uptime_secs() -> u64 {
    PROCESS_START
        .get_or_init(Instant::now)
        .elapsed()
        .as_secs()
}
