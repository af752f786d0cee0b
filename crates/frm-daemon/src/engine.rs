//! Reconciliation engine.
//!
//! Three activities drive the backend toward the lease set:
//!
//! 1. **Bootstrap**: one full sync inside [`ReconcileEngine::start`]. Fatal on
//!    any error.
//! 2. **Monitor**: watches the store from `last_seen_index + 1` and applies
//!    each change according to the [`WatchPolicy`].
//! 3. **Reconciler**: a full sync every `sync_interval`.
//!
//! Every backend mutation runs while holding the single engine mutex, so no
//! two passes ever interleave. Stop is cooperative: the tasks notice the
//! signal while waiting, never in the middle of a pass.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use frm_config::{ManagerConfig, WatchPolicy};
use frm_reconcile::{BackendError, RouteBackend, SyncOutcome};
use frm_schemas::{decode_lease, subnet_from_key, DecodeError, DesiredRoutes, WatchEvent};
use frm_store::{LeaseStore, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a full sync pass failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    Store(StoreError),
    Decode(DecodeError),
    Backend(BackendError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Store(e) => write!(f, "lease read failed: {e}"),
            EngineError::Decode(e) => write!(f, "lease decode failed: {e}"),
            EngineError::Backend(e) => write!(f, "route sync failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            EngineError::Decode(e) => Some(e),
            EngineError::Backend(e) => Some(e),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<DecodeError> for EngineError {
    fn from(e: DecodeError) -> Self {
        EngineError::Decode(e)
    }
}

impl From<BackendError> for EngineError {
    fn from(e: BackendError) -> Self {
        EngineError::Backend(e)
    }
}

// ---------------------------------------------------------------------------
// Config + status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding the leases, e.g. `/coreos.com/network/subnets`.
    pub prefix: String,
    pub sync_interval: Duration,
    pub watch_retry: Duration,
    pub watch_policy: WatchPolicy,
}

impl EngineConfig {
    pub fn from_manager(cfg: &ManagerConfig) -> Self {
        Self {
            prefix: cfg.etcd.subnets_prefix(),
            sync_interval: cfg.sync.interval(),
            watch_retry: cfg.sync.watch_retry(),
            watch_policy: cfg.sync.watch_policy,
        }
    }
}

/// Counters surfaced by `GET /v1/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub last_seen_index: u64,
    pub full_syncs_ok: u64,
    pub full_syncs_failed: u64,
    pub events_applied: u64,
    pub events_skipped: u64,
    pub last_sync_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub watch_policy: String,
}

pub type SharedStatus = Arc<RwLock<EngineStatus>>;

/// State every activity reads and writes under the engine mutex.
#[derive(Debug, Default)]
struct EngineState {
    last_seen_index: u64,
    stopping: bool,
}

struct Shared {
    store: Arc<dyn LeaseStore>,
    backend: Arc<dyn RouteBackend>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    status: SharedStatus,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An unstarted engine.
pub struct ReconcileEngine {
    shared: Arc<Shared>,
}

impl ReconcileEngine {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        backend: Arc<dyn RouteBackend>,
        config: EngineConfig,
    ) -> Self {
        let status = EngineStatus {
            watch_policy: config.watch_policy.as_str().to_string(),
            ..EngineStatus::default()
        };
        Self {
            shared: Arc::new(Shared {
                store,
                backend,
                config,
                state: Mutex::new(EngineState::default()),
                status: Arc::new(RwLock::new(status)),
            }),
        }
    }

    /// Handle onto the live status counters.
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.shared.status)
    }

    /// Run the bootstrap sync, then spawn the monitor and reconciler.
    pub async fn start(self) -> Result<EngineHandle, EngineError> {
        {
            let mut st = self.shared.state.lock().await;
            info!(prefix = %self.shared.config.prefix, "bootstrap sync");
            self.shared.record_full_sync(&mut st, "bootstrap").await?;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = tokio::spawn(monitor(Arc::clone(&self.shared), stop_rx.clone()));
        let reconciler = tokio::spawn(reconciler(Arc::clone(&self.shared), stop_rx));

        Ok(EngineHandle {
            shared: self.shared,
            stop_tx,
            monitor,
            reconciler,
        })
    }
}

/// A running engine.
pub struct EngineHandle {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    monitor: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

impl EngineHandle {
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.shared.status)
    }

    /// Stop both activities and wait for them to exit. A pass already running
    /// finishes first.
    pub async fn stop(self) {
        self.shared.state.lock().await.stopping = true;
        let _ = self.stop_tx.send(true);

        if let Err(e) = self.monitor.await {
            error!(error = %e, "monitor task panicked");
        }
        if let Err(e) = self.reconciler.await {
            error!(error = %e, "reconciler task panicked");
        }
        info!("engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Passes (all called with the engine mutex held)
// ---------------------------------------------------------------------------

impl Shared {
    async fn full_sync(&self, st: &mut EngineState) -> Result<SyncOutcome, EngineError> {
        let tree = self.store.get_tree(&self.config.prefix).await?;
        let desired = DesiredRoutes::from_nodes(&tree.nodes)?;
        info!(index = tree.index, leases = desired.len(), "syncing all routes");

        let outcome = self.backend.sync(&desired).await?;
        if tree.index > st.last_seen_index {
            st.last_seen_index = tree.index;
        }
        info!(
            index = st.last_seen_index,
            inserted = outcome.inserted.len(),
            deleted = outcome.deleted.len(),
            "routes synced"
        );
        Ok(outcome)
    }

    /// Full sync plus status bookkeeping. `trigger` names the activity for logs.
    async fn record_full_sync(
        &self,
        st: &mut EngineState,
        trigger: &'static str,
    ) -> Result<SyncOutcome, EngineError> {
        let res = self.full_sync(st).await;
        let mut status = self.status.write().await;
        status.last_seen_index = st.last_seen_index;
        match &res {
            Ok(_) => {
                status.full_syncs_ok += 1;
                status.last_sync_at_ms = Some(chrono::Utc::now().timestamp_millis());
                status.last_error = None;
            }
            Err(e) => {
                error!(trigger, error = %e, "full sync failed");
                status.full_syncs_failed += 1;
                status.last_error = Some(e.to_string());
            }
        }
        res
    }

    async fn handle_event(&self, ev: WatchEvent) {
        let mut st = self.state.lock().await;
        if st.stopping {
            return;
        }
        let index = ev.index();
        if index <= st.last_seen_index {
            debug!(index, last_seen = st.last_seen_index, key = %ev.node.key, "event already synced");
            self.status.write().await.events_skipped += 1;
            return;
        }
        st.last_seen_index = index;

        match self.config.watch_policy {
            WatchPolicy::FullResync => {
                debug!(index, action = ev.action.as_str(), key = %ev.node.key, "change seen; resyncing");
                let _ = self.record_full_sync(&mut st, "watch").await;
            }
            WatchPolicy::Incremental => self.apply_event(&ev).await,
        }

        let mut status = self.status.write().await;
        status.events_applied += 1;
        status.last_seen_index = st.last_seen_index;
    }

    /// Apply one change as a single insert or delete. Failures are logged;
    /// the next full sync repairs whatever was missed.
    async fn apply_event(&self, ev: &WatchEvent) {
        let key = ev.node.key.as_str();
        let action = ev.action.as_str();

        if ev.action.is_upsert() {
            let lease = match decode_lease(key, &ev.node.value) {
                Ok(l) => l,
                Err(e) => {
                    warn!(action, key, error = %e, "skipping undecodable lease");
                    return;
                }
            };
            if let Err(e) = self.backend.insert(lease.owner_ip, lease.subnet).await {
                error!(action, key, subnet = %lease.subnet, next_hop = %lease.owner_ip, error = %e, "route insert failed");
                self.status.write().await.last_error = Some(e.to_string());
            }
        } else if ev.action.is_removal() {
            let subnet = match subnet_from_key(key) {
                Ok(s) => s,
                Err(e) => {
                    warn!(action, key, error = %e, "skipping undecodable lease key");
                    return;
                }
            };
            if let Err(e) = self.backend.delete(subnet).await {
                error!(action, key, subnet = %subnet, error = %e, "route delete failed");
                self.status.write().await.last_error = Some(e.to_string());
            }
        } else {
            info!(action, key, "ignoring watch action");
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Wait `d` unless stop arrives first. Returns false on stop.
async fn pause(stop: &mut watch::Receiver<bool>, d: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

async fn monitor(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let prefix = shared.config.prefix.clone();
    loop {
        if *stop.borrow() {
            break;
        }
        let from = shared.state.lock().await.last_seen_index + 1;

        let res = tokio::select! {
            _ = stop.changed() => break,
            r = shared.store.watch(&prefix, from) => r,
        };

        match res {
            Ok(ev) => shared.handle_event(ev).await,
            Err(StoreError::WatchExpired { requested, current }) => {
                warn!(requested, current, "watch index expired; resyncing");
                let ok = {
                    let mut st = shared.state.lock().await;
                    if st.stopping {
                        break;
                    }
                    shared.record_full_sync(&mut st, "watch-expired").await.is_ok()
                };
                // Without a fresh index the next watch would expire again.
                if !ok && !pause(&mut stop, shared.config.watch_retry).await {
                    break;
                }
            }
            Err(e) => {
                error!(index = from, error = %e, "watch failed; retrying");
                shared.status.write().await.last_error = Some(e.to_string());
                if !pause(&mut stop, shared.config.watch_retry).await {
                    break;
                }
            }
        }
    }
    debug!("monitor exited");
}

async fn reconciler(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let period = shared.config.sync_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        let mut st = shared.state.lock().await;
        if st.stopping {
            break;
        }
        let _ = shared.record_full_sync(&mut st, "timer").await;
    }
    debug!("reconciler exited");
}
