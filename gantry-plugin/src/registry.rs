use crate::plugin::{PluginFactory, PluginInstance};
use gantry_core::plugin_config::PluginConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Factory registry. Populated once at startup; instance construction
/// happens on every reload from the stored configurations.
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. Re-registering a name overwrites the
    /// previous factory with a warning.
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(plugin = %name, "Overwriting previously registered plugin factory");
        } else {
            info!(plugin = %name, "Registered plugin");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PluginFactory>> {
        self.factories.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build instances from stored configurations, in order. A config
    /// whose factory is missing, whose scope references are
    /// inconsistent, or whose document fails validation is skipped
    /// with a recorded error; the load itself never aborts.
    pub fn build_instances(&self, configs: &[PluginConfig]) -> Vec<Arc<PluginInstance>> {
        let mut instances = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.enabled {
                continue;
            }
            if let Err(e) = config.validate_scope() {
                error!(plugin_id = %config.id, error = %e, "Skipping plugin: scope mismatch");
                continue;
            }
            let Some(factory) = self.factories.get(&config.name) else {
                error!(plugin_id = %config.id, plugin = %config.name, "Skipping plugin: unknown kind");
                continue;
            };
            match factory.create(&config.config) {
                Ok(plugin) => instances.push(Arc::new(PluginInstance::from_config(config, plugin))),
                Err(e) => {
                    error!(
                        plugin_id = %config.id,
                        plugin = %config.name,
                        error = %e,
                        "Skipping plugin: config rejected"
                    );
                }
            }
        }
        instances
    }

    /// Validate a config document against a factory without installing
    /// anything. Used by the control plane.
    pub fn validate_config(&self, name: &str, config: &serde_json::Value) -> anyhow::Result<()> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown plugin: {name}"))?;
        factory.create(config).map(|_| ())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
