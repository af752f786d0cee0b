//! Command line, effective configuration, and backend selection.
//!
//! Precedence, lowest first: built-in defaults, `--config` layers (in order),
//! command-line flags. `FRM_DAEMON_ADDR` stands in for `--listen-addr`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use frm_backend_google::GoogleRouteTable;
use frm_config::{
    load_layered_yaml, report_unused_keys, ManagerConfig, UnusedKeyPolicy, WatchPolicy,
};
use frm_reconcile::{RouteBackend, RouteTable, TableBackend};
use tracing::{info, warn};

pub const ENV_DAEMON_ADDR: &str = "FRM_DAEMON_ADDR";

#[derive(Debug, Parser)]
#[command(name = "frm-daemon")]
#[command(about = "Keeps a cloud route table in sync with flannel subnet leases", long_about = None)]
pub struct Cli {
    /// Route backend provider.
    #[arg(long)]
    pub backend: Option<String>,

    /// etcd v2 endpoint.
    #[arg(long)]
    pub etcd_endpoint: Option<String>,

    /// etcd network prefix; leases are read from `<prefix>/subnets`.
    #[arg(long)]
    pub etcd_prefix: Option<String>,

    /// Seconds between full syncs.
    #[arg(long)]
    pub sync_interval: Option<u64>,

    /// full-resync | incremental
    #[arg(long)]
    pub watch_policy: Option<WatchPolicy>,

    /// Layered YAML config; may be repeated, later files override earlier ones.
    #[arg(long = "config")]
    pub config: Vec<String>,

    /// Serve /v1/health and /v1/status on this address.
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Delete every route this manager owns, print the names, and exit.
    #[arg(long, default_value_t = false)]
    pub delete_all_routes: bool,
}

/// Effective configuration after layering files and applying flags.
pub fn resolve_config(cli: &Cli, env_addr: Option<String>) -> Result<ManagerConfig> {
    let mut cfg = if cli.config.is_empty() {
        ManagerConfig::default()
    } else {
        let paths: Vec<&str> = cli.config.iter().map(String::as_str).collect();
        let loaded = load_layered_yaml(&paths)?;
        info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

        let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
        for key in &report.unused_leaf_pointers {
            warn!(key = %key, "unused config key");
        }
        loaded.manager_config()?
    };

    if let Some(b) = &cli.backend {
        cfg.backend = b.clone();
    }
    if let Some(e) = &cli.etcd_endpoint {
        cfg.etcd.endpoint = e.clone();
    }
    if let Some(p) = &cli.etcd_prefix {
        cfg.etcd.prefix = p.clone();
    }
    if let Some(s) = cli.sync_interval {
        cfg.sync.interval_secs = s;
    }
    if let Some(w) = cli.watch_policy {
        cfg.sync.watch_policy = w;
    }
    if let Some(a) = cli.listen_addr {
        cfg.daemon.listen_addr = Some(a.to_string());
    } else if let Some(a) = env_addr {
        cfg.daemon.listen_addr = Some(a);
    }

    cfg.validate()?;
    Ok(cfg)
}

/// Parsed status-server address, if one is configured.
pub fn listen_addr(cfg: &ManagerConfig) -> Result<Option<SocketAddr>> {
    cfg.daemon
        .listen_addr
        .as_deref()
        .map(|a| {
            a.parse::<SocketAddr>()
                .with_context(|| format!("invalid daemon.listen_addr: {a}"))
        })
        .transpose()
}

/// Build the configured backend. Unknown names fail before any I/O.
pub async fn build_backend(cfg: &ManagerConfig) -> Result<Arc<dyn RouteBackend>> {
    match cfg.backend.as_str() {
        "google" => {
            let table = GoogleRouteTable::from_config(&cfg.google)
                .await
                .context("google backend init failed")?;
            info!(project = %table.project(), network = %table.network(), "google backend ready");
            Ok(Arc::new(TableBackend::new(table)))
        }
        other => bail!("unknown backend {other}"),
    }
}
