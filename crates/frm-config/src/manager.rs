//! Typed manager configuration with its defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_BACKEND: &str = "google";
pub const DEFAULT_ETCD_ENDPOINT: &str = "http://127.0.0.1:4001";
pub const DEFAULT_ETCD_PREFIX: &str = "/coreos.com/network";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_WATCH_RETRY_SECS: u64 = 10;

/// How the engine reacts to a lease change seen by the watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchPolicy {
    /// Any change triggers a full sync pass.
    #[default]
    FullResync,
    /// Apply the single event (insert/delete one route).
    Incremental,
}

impl WatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchPolicy::FullResync => "full-resync",
            WatchPolicy::Incremental => "incremental",
        }
    }
}

impl fmt::Display for WatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-resync" => Ok(WatchPolicy::FullResync),
            "incremental" => Ok(WatchPolicy::Incremental),
            other => Err(format!(
                "unknown watch policy '{other}' (expected full-resync or incremental)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdSection {
    pub endpoint: String,
    /// Network prefix; leases live under `<prefix>/subnets`.
    pub prefix: String,
}

impl Default for EtcdSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ETCD_ENDPOINT.to_string(),
            prefix: DEFAULT_ETCD_PREFIX.to_string(),
        }
    }
}

impl EtcdSection {
    /// Directory the host agents write their leases to.
    pub fn subnets_prefix(&self) -> String {
        format!("{}/subnets", self.prefix.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub interval_secs: u64,
    pub watch_retry_secs: u64,
    pub watch_policy: WatchPolicy,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            watch_retry_secs: DEFAULT_WATCH_RETRY_SECS,
            watch_policy: WatchPolicy::default(),
        }
    }
}

impl SyncSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs)
    }
}

/// Google backend settings. Unset project/network come from the metadata server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSection {
    pub project: Option<String>,
    pub network: Option<String>,
    pub api_base_url: Option<String>,
    pub metadata_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Status server bind address; no server when unset.
    pub listen_addr: Option<String>,
}

/// Everything the manager reads from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub backend: String,
    pub etcd: EtcdSection,
    pub sync: SyncSection,
    pub google: GoogleSection,
    pub daemon: DaemonSection,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            etcd: EtcdSection::default(),
            sync: SyncSection::default(),
            google: GoogleSection::default(),
            daemon: DaemonSection::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: ManagerConfig =
            serde_json::from_value(v.clone()).context("config does not match ManagerConfig")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            bail!("CONFIG_INVALID backend must not be empty");
        }
        if self.etcd.endpoint.trim().is_empty() {
            bail!("CONFIG_INVALID etcd.endpoint must not be empty");
        }
        if !self.etcd.prefix.starts_with('/') {
            bail!(
                "CONFIG_INVALID etcd.prefix must start with '/': {}",
                self.etcd.prefix
            );
        }
        if self.sync.interval_secs == 0 {
            bail!("CONFIG_INVALID sync.interval_secs must be > 0");
        }
        if self.sync.watch_retry_secs == 0 {
            bail!("CONFIG_INVALID sync.watch_retry_secs must be > 0");
        }
        Ok(())
    }
}
