use crate::repository::Repository;
use arc_swap::ArcSwap;
use gantry_core::error::GatewayError;
use gantry_core::matcher::RouteMatcher;
use gantry_core::plugin_config::PluginConfig;
use gantry_core::route::Route;
use gantry_core::service::Service;
use gantry_plugin::plugin::PluginInstance;
use gantry_plugin::registry::PluginRegistry;
use std::sync::Arc;
use tracing::{error, info};

/// The immutable triple every in-flight request resolves against:
/// routing index + service map (inside the matcher) and the ordered
/// plugin instance list.
///
/// Handlers clone the Arc once at dispatch and keep it for the whole
/// request, so a reload never tears a request between two
/// configurations.
pub struct RoutingSnapshot {
    pub matcher: RouteMatcher,
    pub plugins: Vec<Arc<PluginInstance>>,
    pub generation: u64,
    pub route_count: usize,
}

impl RoutingSnapshot {
    fn empty() -> Self {
        Self {
            matcher: RouteMatcher::build(Vec::new(), Vec::new()),
            plugins: Vec::new(),
            generation: 0,
            route_count: 0,
        }
    }
}

/// The published snapshot pointer. Readers load it lock-free; the
/// reload coordinator swaps it atomically.
pub struct SnapshotHandle {
    current: ArcSwap<RoutingSnapshot>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RoutingSnapshot::empty()),
        }
    }

    /// The current snapshot; held by reference for the remainder of a
    /// request.
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Atomically publish a new snapshot.
    pub fn publish(&self, snapshot: RoutingSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Ready once a first real snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.current.load().generation > 0
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a snapshot from fetched configuration. A plugin that fails to
/// construct is absent from the result (the registry records the
/// error); route and service data always produce a usable snapshot.
pub fn build_snapshot(
    generation: u64,
    services: Vec<Service>,
    routes: Vec<Route>,
    plugin_configs: Vec<PluginConfig>,
    registry: &PluginRegistry,
) -> RoutingSnapshot {
    let route_count = routes.iter().filter(|r| r.enabled).count();
    let plugins = registry.build_instances(&plugin_configs);
    let matcher = RouteMatcher::build(routes, services);
    RoutingSnapshot {
        matcher,
        plugins,
        generation,
        route_count,
    }
}

/// Drives full reloads: fetch everything, rebuild plugin instances and
/// the routing index, and swap the snapshot pointer.
///
/// Reloads are serialized by the watcher loop. A store failure
/// mid-read abandons the reload and keeps the previous snapshot
/// current.
pub struct ReloadCoordinator {
    repo: Repository,
    registry: Arc<PluginRegistry>,
    handle: Arc<SnapshotHandle>,
}

impl ReloadCoordinator {
    pub fn new(repo: Repository, registry: Arc<PluginRegistry>, handle: Arc<SnapshotHandle>) -> Self {
        Self {
            repo,
            registry,
            handle,
        }
    }

    /// Full reload. Returns the published generation.
    pub async fn reload(&self) -> Result<u64, GatewayError> {
        let services = self
            .repo
            .list_enabled_services()
            .await
            .map_err(|e| GatewayError::Reload(format!("reading services: {e}")))?;
        let routes = self
            .repo
            .list_enabled_routes()
            .await
            .map_err(|e| GatewayError::Reload(format!("reading routes: {e}")))?;
        let plugin_configs = self
            .repo
            .list_enabled_plugins()
            .await
            .map_err(|e| GatewayError::Reload(format!("reading plugins: {e}")))?;

        let generation = self.handle.load().generation + 1;
        let snapshot = build_snapshot(generation, services, routes, plugin_configs, &self.registry);

        info!(
            generation,
            routes = snapshot.route_count,
            services = snapshot.matcher.service_count(),
            plugins = snapshot.plugins.len(),
            "Publishing configuration snapshot"
        );
        self.handle.publish(snapshot);
        Ok(generation)
    }

    /// Reload under the watcher-loop deadline, logging instead of
    /// propagating; a failed or stalled reload leaves the prior
    /// snapshot alone.
    pub async fn reload_logged(&self) {
        match tokio::time::timeout(std::time::Duration::from_secs(30), self.reload()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Reload abandoned, keeping previous snapshot"),
            Err(_) => error!("Reload timed out, keeping previous snapshot"),
        }
    }
}
