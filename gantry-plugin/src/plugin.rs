use crate::context::RequestContext;
use async_trait::async_trait;
use gantry_core::plugin_config::{PluginConfig, PluginScope};
use gantry_core::route::Route;
use gantry_core::service::Service;
use std::sync::Arc;

/// A configured plugin. Implementations are shared across requests and
/// re-entered concurrently; per-request state belongs in the context.
///
/// `execute` is phase-aware: it inspects `ctx.phase` and acts (or does
/// nothing) accordingly.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin kind name.
    fn name(&self) -> &str;

    /// Run the plugin for the context's current phase.
    async fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

/// Builds plugin instances from opaque config documents. Construction
/// may fail with a validation error, which drops that plugin from the
/// snapshot without affecting the rest of the load.
pub trait PluginFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, config: &serde_json::Value) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// A constructed plugin bound to its stored configuration: scoping,
/// ordering, and the critical flag live here.
pub struct PluginInstance {
    pub id: String,
    pub name: String,
    pub scope: PluginScope,
    pub service_id: Option<String>,
    pub route_id: Option<String>,
    pub priority: i32,
    pub critical: bool,
    pub plugin: Arc<dyn Plugin>,
}

impl PluginInstance {
    pub fn from_config(config: &PluginConfig, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            scope: config.scope,
            service_id: config.service_id.clone(),
            route_id: config.route_id.clone(),
            priority: config.priority,
            critical: config.is_critical(),
            plugin,
        }
    }

    /// Whether this instance applies to the matched route/service pair.
    /// Consumer scope is reserved: loaded but never admitted.
    pub fn admits(&self, route: &Route, service: &Service) -> bool {
        match self.scope {
            PluginScope::Global => true,
            PluginScope::Service => self.service_id.as_deref() == Some(service.id.as_str()),
            PluginScope::Route => self.route_id.as_deref() == Some(route.id.as_str()),
            PluginScope::Consumer => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn execute(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn instance(json: serde_json::Value) -> PluginInstance {
        let config: PluginConfig = serde_json::from_value(json).unwrap();
        PluginInstance::from_config(&config, Arc::new(Noop))
    }

    fn route(id: &str) -> Route {
        serde_json::from_value(serde_json::json!({
            "id": id, "service_id": "s1", "paths": ["/a"]
        }))
        .unwrap()
    }

    fn service(id: &str) -> Service {
        serde_json::from_value(serde_json::json!({ "id": id, "host": "backend" })).unwrap()
    }

    #[test]
    fn global_scope_admits_everything() {
        let inst = instance(serde_json::json!({ "id": "p1", "name": "noop" }));
        assert!(inst.admits(&route("r1"), &service("s1")));
        assert!(inst.admits(&route("r2"), &service("s2")));
    }

    #[test]
    fn service_scope_matches_service_id() {
        let inst = instance(serde_json::json!({
            "id": "p1", "name": "noop", "scope": "service", "service_id": "s1"
        }));
        assert!(inst.admits(&route("r1"), &service("s1")));
        assert!(!inst.admits(&route("r1"), &service("s2")));
    }

    #[test]
    fn route_scope_matches_route_id() {
        let inst = instance(serde_json::json!({
            "id": "p1", "name": "noop", "scope": "route", "route_id": "r1"
        }));
        assert!(inst.admits(&route("r1"), &service("s1")));
        assert!(!inst.admits(&route("r2"), &service("s1")));
    }

    #[test]
    fn consumer_scope_is_never_admitted() {
        let inst = instance(serde_json::json!({
            "id": "p1", "name": "noop", "scope": "consumer", "consumer_id": "c1"
        }));
        assert!(!inst.admits(&route("r1"), &service("s1")));
    }

    #[test]
    fn critical_flag_comes_from_config_document() {
        let inst = instance(serde_json::json!({
            "id": "p1", "name": "noop", "config": { "critical": true }
        }));
        assert!(inst.critical);
    }

    #[test]
    fn phase_labels() {
        assert_eq!(Phase::BeforeRequest.as_str(), "before_request");
        assert_eq!(Phase::AfterResponse.as_str(), "after_response");
    }
}
