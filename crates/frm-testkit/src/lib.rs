//! frm-testkit
//!
//! Deterministic in-memory doubles for the two external systems the route
//! manager talks to:
//!
//! - [`MemoryLeaseStore`]: a lease store with an event log, blocking watches,
//!   compaction and failure injection.
//! - [`MemoryRouteTable`]: a route table with call counters, a concurrency
//!   probe and failure injection.
//!
//! No network I/O. Shared by the scenario tests of every crate.

mod lease_store;
mod route_table;

use std::future::Future;
use std::time::Duration;

pub use lease_store::MemoryLeaseStore;
pub use route_table::{CallCounts, MemoryRouteTable, TableOp};

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
/// Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Like [`wait_until`] for conditions that need to await.
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
