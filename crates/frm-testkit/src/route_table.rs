//! In-memory route table.
//!
//! Cloning yields another handle onto the same table, so a test can keep one
//! handle for inspection while a `TableBackend` owns another.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use frm_reconcile::{BackendError, RouteTable};
use frm_schemas::{LiveRoute, NewRoute};

/// Simulated latency of every call, long enough for overlapping callers to
/// be caught by the concurrency probe.
const DEFAULT_LATENCY: Duration = Duration::from_millis(2);

/// Which table operation a failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableOp {
    List,
    Get,
    Insert,
    Delete,
}

/// Number of calls per operation since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: u64,
    pub get: u64,
    pub insert: u64,
    pub delete: u64,
}

impl CallCounts {
    /// Calls that change the table.
    pub fn mutations(&self) -> u64 {
        self.insert + self.delete
    }
}

#[derive(Debug, Default)]
struct TableState {
    routes: BTreeMap<String, LiveRoute>,
    calls: CallCounts,
    failures: HashMap<TableOp, VecDeque<BackendError>>,
}

#[derive(Debug)]
struct Shared {
    network: String,
    latency: Duration,
    state: Mutex<TableState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Route table double for one network.
#[derive(Debug, Clone)]
pub struct MemoryRouteTable {
    shared: Arc<Shared>,
}

struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryRouteTable {
    pub fn new(network: impl Into<String>) -> Self {
        Self::with_latency(network, DEFAULT_LATENCY)
    }

    pub fn with_latency(network: impl Into<String>, latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                network: network.into(),
                latency,
                state: Mutex::new(TableState::default()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.shared.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Put a route in place without counting a call (pre-existing state,
    /// foreign routes, hand-edited routes).
    pub fn seed(&self, route: LiveRoute) {
        self.state().routes.insert(route.name.clone(), route);
    }

    /// Snapshot of every route, ordered by name.
    pub fn routes(&self) -> Vec<LiveRoute> {
        self.state().routes.values().cloned().collect()
    }

    pub fn route(&self, name: &str) -> Option<LiveRoute> {
        self.state().routes.get(name).cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn reset_calls(&self) {
        self.state().calls = CallCounts::default();
    }

    /// The next call of `op` fails with `err`. Queued failures are consumed in
    /// order.
    pub fn fail_next(&self, op: TableOp, err: BackendError) {
        self.state().failures.entry(op).or_default().push_back(err);
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Count the call, simulate latency, then surface any injected failure.
    async fn enter(&self, op: TableOp) -> Result<InFlight<'_>, BackendError> {
        let now = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.shared);

        {
            let mut st = self.state();
            match op {
                TableOp::List => st.calls.list += 1,
                TableOp::Get => st.calls.get += 1,
                TableOp::Insert => st.calls.insert += 1,
                TableOp::Delete => st.calls.delete += 1,
            }
        }

        tokio::time::sleep(self.shared.latency).await;

        let injected = self
            .state()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }
}

#[async_trait]
impl RouteTable for MemoryRouteTable {
    fn provider(&self) -> &'static str {
        "memory"
    }

    fn network(&self) -> &str {
        &self.shared.network
    }

    async fn list_routes(&self, name_prefix: &str) -> Result<Vec<LiveRoute>, BackendError> {
        let _call = self.enter(TableOp::List).await?;
        Ok(self
            .state()
            .routes
            .values()
            .filter(|r| r.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn get_route(&self, name: &str) -> Result<Option<LiveRoute>, BackendError> {
        let _call = self.enter(TableOp::Get).await?;
        Ok(self.route(name))
    }

    async fn insert_route(&self, route: &NewRoute) -> Result<(), BackendError> {
        let _call = self.enter(TableOp::Insert).await?;
        let mut st = self.state();
        if st.routes.contains_key(&route.name) {
            return Err(BackendError::Conflict(route.name.clone()));
        }
        st.routes.insert(route.name.clone(), route.to_live());
        Ok(())
    }

    async fn delete_route(&self, name: &str) -> Result<(), BackendError> {
        let _call = self.enter(TableOp::Delete).await?;
        match self.state().routes.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_existing_name_conflicts() {
        let t = MemoryRouteTable::with_latency("net", Duration::ZERO);
        let r = NewRoute::new(
            "flannel-net-10-1-0-0-24",
            "10.1.0.0/24".parse().unwrap(),
            "203.0.113.5".parse().unwrap(),
        );
        t.insert_route(&r).await.unwrap();
        assert_eq!(
            t.insert_route(&r).await,
            Err(BackendError::Conflict("flannel-net-10-1-0-0-24".to_string()))
        );
        assert_eq!(t.calls().insert, 2);
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let t = MemoryRouteTable::with_latency("net", Duration::ZERO);
        t.fail_next(TableOp::List, BackendError::Unavailable("down".into()));
        assert!(t.list_routes("flannel-net-").await.is_err());
        assert!(t.list_routes("flannel-net-").await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = MemoryRouteTable::with_latency("net", Duration::ZERO);
        let b = a.clone();
        a.seed(LiveRoute::new("x", "10.0.0.0/8", "1.2.3.4"));
        assert_eq!(b.routes().len(), 1);
    }
}
