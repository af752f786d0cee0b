use serde::{Deserialize, Serialize};

/// A single key/value node as returned by the lease store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseNode {
    pub key: String,
    /// Raw record body. Empty for deletions and expirations.
    #[serde(default)]
    pub value: String,
    pub modified_index: u64,
}

impl LeaseNode {
    pub fn new(key: impl Into<String>, value: impl Into<String>, modified_index: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            modified_index,
        }
    }
}

/// Full read of every lease under a prefix, tagged with the store index the
/// read was served at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseTree {
    pub index: u64,
    pub nodes: Vec<LeaseNode>,
}

/// Store-level action carried by a watch event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchAction {
    Create,
    Set,
    Update,
    CompareAndSwap,
    Delete,
    Expire,
    CompareAndDelete,
    /// Anything the store reports that the manager does not recognise.
    Unknown(String),
}

impl WatchAction {
    pub fn parse(s: &str) -> Self {
        match s {
            "create" => WatchAction::Create,
            "set" => WatchAction::Set,
            "update" => WatchAction::Update,
            "compareAndSwap" => WatchAction::CompareAndSwap,
            "delete" => WatchAction::Delete,
            "expire" => WatchAction::Expire,
            "compareAndDelete" => WatchAction::CompareAndDelete,
            other => WatchAction::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WatchAction::Create => "create",
            WatchAction::Set => "set",
            WatchAction::Update => "update",
            WatchAction::CompareAndSwap => "compareAndSwap",
            WatchAction::Delete => "delete",
            WatchAction::Expire => "expire",
            WatchAction::CompareAndDelete => "compareAndDelete",
            WatchAction::Unknown(s) => s.as_str(),
        }
    }

    /// The lease now exists with the node's value.
    pub fn is_upsert(&self) -> bool {
        matches!(
            self,
            WatchAction::Create | WatchAction::Set | WatchAction::Update | WatchAction::CompareAndSwap
        )
    }

    /// The lease is gone.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            WatchAction::Delete | WatchAction::Expire | WatchAction::CompareAndDelete
        )
    }
}

/// One change reported by a watch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub node: LeaseNode,
}

impl WatchEvent {
    pub fn index(&self) -> u64 {
        self.node.modified_index
    }
}
