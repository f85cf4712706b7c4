pub mod cors;
pub mod rate_limit;
pub mod request_logger;

use gantry_limit::RateLimitStore;
use gantry_plugin::registry::PluginRegistry;
use gantry_store::repository::Repository;
use std::sync::Arc;

/// Register every built-in plugin factory.
pub fn register_all(registry: &mut PluginRegistry, store: RateLimitStore, repo: Repository) {
    registry.register(Arc::new(cors::CorsFactory));
    registry.register(Arc::new(request_logger::RequestLoggerFactory));
    registry.register(Arc::new(rate_limit::RateLimitFactory::with_repository(
        store, repo,
    )));
}
