use clap::Parser;
use gantry_core::config::GatewayConfig;
use gantry_limit::RateLimitStore;
use gantry_plugin::registry::PluginRegistry;
use gantry_proxy::engine::ProxyEngine;
use gantry_server::dispatcher::{dispatch_router, DispatchState};
use gantry_server::ops::{ops_router, OpsState};
use gantry_store::repository::Repository;
use gantry_store::snapshot::{ReloadCoordinator, SnapshotHandle};
use gantry_store::watcher::ConfigWatcher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gantry", version, about = "Gantry — API gateway data plane")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    // ── Config ──
    let config = GatewayConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %config.node_id,
        "Gantry starting"
    );

    // ── Stores ──
    let repo = Repository::connect(&config.database).await?;
    let limit_store = RateLimitStore::connect(&config.redis.url).await?;

    // ── Plugin registry ──
    let mut registry = PluginRegistry::new();
    gantry_plugins::register_all(&mut registry, limit_store.clone(), repo.clone());
    info!(plugins = registry.len(), "Plugins registered");
    let registry = Arc::new(registry);

    // ── Snapshot + initial load ──
    let snapshot = Arc::new(SnapshotHandle::new());
    let coordinator = Arc::new(ReloadCoordinator::new(
        repo.clone(),
        Arc::clone(&registry),
        Arc::clone(&snapshot),
    ));
    match coordinator.reload().await {
        Ok(generation) => info!(generation, "Initial snapshot loaded"),
        // Not fatal: the gateway serves 404s and reports not-ready
        // until a reload succeeds.
        Err(e) => error!(error = %e, "Initial snapshot load failed"),
    }

    // ── Change watcher ──
    let watcher = ConfigWatcher::new(&config.redis.url, &config.redis.events_channel);
    let watcher_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        watcher.run(watcher_coordinator).await;
    });

    // ── Listener ──
    let engine = Arc::new(ProxyEngine::new(&config.proxy)?);
    let app = dispatch_router(DispatchState {
        snapshot: Arc::clone(&snapshot),
        engine,
    })
    .merge(ops_router(OpsState {
        snapshot,
        repo,
        limit_store,
    }));

    let listener = tokio::net::TcpListener::bind(config.proxy.listen_addr).await?;
    info!(addr = %config.proxy.listen_addr, "Gantry is ready, serving traffic");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gantry stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, stopping");
}
