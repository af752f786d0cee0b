//! In-memory lease store.
//!
//! Every mutation bumps the store index and appends a [`WatchEvent`] to the
//! log. A watch returns the first logged event under the prefix at or after
//! the requested index, blocking until one is appended. [`compact`] drops the
//! log so older indexes surface as `WatchExpired`, like etcd's bounded
//! history.
//!
//! [`compact`]: MemoryLeaseStore::compact

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use frm_schemas::{
    encode_lease_value, lease_key, LeaseNode, LeaseTree, Subnet, WatchAction, WatchEvent,
};
use frm_store::{LeaseStore, StoreError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StoreInner {
    index: u64,
    leases: BTreeMap<String, LeaseNode>,
    log: Vec<WatchEvent>,
    /// Watches from below this index have expired.
    compacted_before: u64,
    get_tree_failures: u32,
    watch_failures: u32,
    get_tree_calls: u64,
    watch_calls: u64,
}

/// Lease store double. Share it as `Arc<MemoryLeaseStore>`.
#[derive(Debug)]
pub struct MemoryLeaseStore {
    prefix: String,
    inner: Mutex<StoreInner>,
    changed: Notify,
}

impl MemoryLeaseStore {
    /// Empty store whose leases live under `prefix` (e.g.
    /// `/coreos.com/network/subnets`). The index starts at 1.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner: Mutex::new(StoreInner {
                index: 1,
                ..StoreInner::default()
            }),
            changed: Notify::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Write `owner` as the holder of `subnet`. Returns the new index.
    pub fn put_lease(&self, subnet: Subnet, owner: Ipv4Addr) -> u64 {
        self.put_raw(lease_key(&self.prefix, &subnet), encode_lease_value(owner))
    }

    /// Write an arbitrary key/value, e.g. a malformed lease.
    pub fn put_raw(&self, key: impl Into<String>, value: impl Into<String>) -> u64 {
        let key = key.into();
        let index = {
            let mut inner = self.lock();
            inner.index += 1;
            let index = inner.index;
            let node = LeaseNode::new(key.clone(), value, index);
            let action = if inner.leases.contains_key(&key) {
                WatchAction::Set
            } else {
                WatchAction::Create
            };
            inner.leases.insert(key, node.clone());
            inner.log.push(WatchEvent { action, node });
            index
        };
        self.changed.notify_waiters();
        index
    }

    /// Delete the lease for `subnet`. Returns the new index, or `None` when
    /// no such lease exists.
    pub fn remove_lease(&self, subnet: Subnet) -> Option<u64> {
        self.remove_key(&lease_key(&self.prefix, &subnet), WatchAction::Delete)
    }

    /// Let the lease for `subnet` expire (TTL ran out).
    pub fn expire_lease(&self, subnet: Subnet) -> Option<u64> {
        self.remove_key(&lease_key(&self.prefix, &subnet), WatchAction::Expire)
    }

    fn remove_key(&self, key: &str, action: WatchAction) -> Option<u64> {
        let index = {
            let mut inner = self.lock();
            inner.leases.remove(key)?;
            inner.index += 1;
            let index = inner.index;
            inner.log.push(WatchEvent {
                action,
                node: LeaseNode::new(key, "", index),
            });
            index
        };
        self.changed.notify_waiters();
        Some(index)
    }

    /// Append an event with any `action` to the log without touching the
    /// lease set, e.g. an action the manager does not recognise.
    pub fn put_event(
        &self,
        action: WatchAction,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> u64 {
        let index = {
            let mut inner = self.lock();
            inner.index += 1;
            let index = inner.index;
            inner.log.push(WatchEvent {
                action,
                node: LeaseNode::new(key, value, index),
            });
            index
        };
        self.changed.notify_waiters();
        index
    }

    /// Forget all history up to the current index.
    pub fn compact(&self) {
        let mut inner = self.lock();
        inner.compacted_before = inner.index + 1;
        inner.log.clear();
    }

    /// The next `n` full reads fail with `Unavailable`.
    pub fn fail_next_get_trees(&self, n: u32) {
        self.lock().get_tree_failures = n;
    }

    /// The next `n` watches fail with `Unavailable`.
    pub fn fail_next_watches(&self, n: u32) {
        self.lock().watch_failures = n;
        self.changed.notify_waiters();
    }

    pub fn current_index(&self) -> u64 {
        self.lock().index
    }

    pub fn get_tree_calls(&self) -> u64 {
        self.lock().get_tree_calls
    }

    pub fn watch_calls(&self) -> u64 {
        self.lock().watch_calls
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get_tree(&self, prefix: &str) -> Result<LeaseTree, StoreError> {
        let mut inner = self.lock();
        inner.get_tree_calls += 1;
        if inner.get_tree_failures > 0 {
            inner.get_tree_failures -= 1;
            return Err(StoreError::Unavailable("injected get_tree failure".to_string()));
        }
        let nodes = inner
            .leases
            .values()
            .filter(|n| n.key.starts_with(prefix))
            .cloned()
            .collect();
        Ok(LeaseTree {
            index: inner.index,
            nodes,
        })
    }

    async fn watch(&self, prefix: &str, from_index: u64) -> Result<WatchEvent, StoreError> {
        self.lock().watch_calls += 1;
        loop {
            // Register before inspecting the log so an append in between is not missed.
            let notified = self.changed.notified();
            {
                let mut inner = self.lock();
                if inner.watch_failures > 0 {
                    inner.watch_failures -= 1;
                    return Err(StoreError::Unavailable("injected watch failure".to_string()));
                }
                if from_index < inner.compacted_before {
                    return Err(StoreError::WatchExpired {
                        requested: from_index,
                        current: inner.index,
                    });
                }
                if let Some(ev) = inner
                    .log
                    .iter()
                    .find(|e| e.index() >= from_index && e.node.key.starts_with(prefix))
                {
                    return Ok(ev.clone());
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn(s: &str) -> Subnet {
        s.parse().unwrap()
    }

    #[test]
    fn put_then_overwrite_logs_create_then_set() {
        let store = MemoryLeaseStore::new("/p/subnets");
        store.put_lease(sn("10.1.0.0/24"), Ipv4Addr::new(203, 0, 113, 5));
        store.put_lease(sn("10.1.0.0/24"), Ipv4Addr::new(203, 0, 113, 6));
        let inner = store.lock();
        let actions: Vec<_> = inner.log.iter().map(|e| e.action.clone()).collect();
        assert_eq!(actions, vec![WatchAction::Create, WatchAction::Set]);
        assert_eq!(inner.index, 3);
    }

    #[test]
    fn removing_absent_lease_is_none() {
        let store = MemoryLeaseStore::new("/p/subnets");
        assert_eq!(store.remove_lease(sn("10.1.0.0/24")), None);
        assert_eq!(store.current_index(), 1);
    }
}
