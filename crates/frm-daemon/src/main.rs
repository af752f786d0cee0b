//! frm-daemon entry point.
//!
//! Thin on purpose: sets up tracing, resolves config, builds the backend and
//! store, then either deletes every owned route (`--delete-all-routes`) or
//! runs the engine until SIGINT/SIGTERM. All logic lives in the library.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use frm_daemon::cli::{self, Cli};
use frm_daemon::engine::{EngineConfig, ReconcileEngine};
use frm_daemon::{routes, state};
use frm_store::EtcdLeaseStore;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent when the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    state::start_uptime_clock();

    let args = Cli::parse();
    let cfg = cli::resolve_config(&args, std::env::var(cli::ENV_DAEMON_ADDR).ok())?;
    let listen = cli::listen_addr(&cfg)?;
    let backend = cli::build_backend(&cfg).await?;

    if args.delete_all_routes {
        match backend.delete_all_routes().await {
            Ok(names) => {
                for name in names {
                    println!("deleted {name}");
                }
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "delete all routes failed");
                println!("{e}");
                std::process::exit(1);
            }
        }
    }

    let store = Arc::new(EtcdLeaseStore::new(cfg.etcd.endpoint.clone()));
    info!(
        endpoint = %cfg.etcd.endpoint,
        prefix = %cfg.etcd.subnets_prefix(),
        sync_interval_secs = cfg.sync.interval_secs,
        watch_policy = %cfg.sync.watch_policy,
        "starting route manager"
    );

    let engine = ReconcileEngine::new(store, backend, EngineConfig::from_manager(&cfg));
    let status = engine.status();
    let handle = engine.start().await.context("bootstrap sync failed")?;

    let server = match listen {
        Some(addr) => {
            let app = routes::build_router(Arc::new(state::AppState::new(status))).layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            );
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind status server on {addr}"))?;
            info!("frm-daemon status on http://{}", addr);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status server crashed");
                }
            }))
        }
        None => None,
    };

    shutdown_signal().await;
    handle.stop().await;
    if let Some(s) = server {
        s.abort();
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("captured SIGINT, exiting..."),
        _ = terminate => info!("captured SIGTERM, exiting..."),
    }
}
