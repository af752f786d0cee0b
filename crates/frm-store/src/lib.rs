//! frm-store
//!
//! Lease store boundary. The engine only needs two capabilities from the
//! store: read every lease under a prefix, and wait for the next change after
//! a given index. [`LeaseStore`] is that contract; [`EtcdLeaseStore`] is the
//! etcd v2 HTTP implementation.

mod etcd;

use std::fmt;

use async_trait::async_trait;
use frm_schemas::{LeaseTree, WatchEvent};

pub use etcd::EtcdLeaseStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`LeaseStore`] implementation may return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Network or transport failure, or the store refused service.
    Unavailable(String),
    /// The requested watch index is older than the store's retained history.
    /// Resume with a fresh full read.
    WatchExpired { requested: u64, current: u64 },
    /// A response payload could not be decoded.
    Decode(String),
    /// The store returned an application-level error.
    Api { code: u64, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::WatchExpired { requested, current } => write!(
                f,
                "watch index {requested} expired (store index {current}); full resync required"
            ),
            StoreError::Decode(msg) => write!(f, "store decode error: {msg}"),
            StoreError::Api { code, message } => {
                write!(f, "store api error code={code}: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Read side of the lease store.
///
/// Object-safe and `Send + Sync` so the engine can share one
/// `Arc<dyn LeaseStore>` between its tasks.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Every lease under `prefix`, with the store index the read was served at.
    /// An absent prefix is an empty tree, not an error.
    async fn get_tree(&self, prefix: &str) -> Result<LeaseTree, StoreError>;

    /// Block until the first change under `prefix` at or after `from_index`.
    ///
    /// Cancel-safe: dropping the future abandons the wait.
    async fn watch(&self, prefix: &str, from_index: u64) -> Result<WatchEvent, StoreError>;
}
