use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// A stored plugin configuration: which plugin runs, where it applies,
/// and its opaque config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique identifier
    pub id: String,

    /// Plugin kind name (must match a registered factory)
    pub name: String,

    /// Where this plugin applies
    #[serde(default)]
    pub scope: PluginScope,

    /// Service reference (scope = service)
    #[serde(default)]
    pub service_id: Option<String>,

    /// Route reference (scope = route)
    #[serde(default)]
    pub route_id: Option<String>,

    /// Consumer reference (scope = consumer; reserved)
    #[serde(default)]
    pub consumer_id: Option<String>,

    /// Opaque plugin configuration document
    #[serde(default)]
    pub config: serde_json::Value,

    /// Execution priority: lower runs earlier in the request phase
    #[serde(default)]
    pub priority: i32,

    /// Whether this plugin is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The subset of requests a plugin applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginScope {
    #[default]
    Global,
    Service,
    Route,
    Consumer,
}

impl PluginConfig {
    /// Whether this plugin halts the request with 500 on execution error.
    /// Parsed defensively from the config document: missing or non-bool
    /// means non-critical.
    pub fn is_critical(&self) -> bool {
        self.config
            .get("critical")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Enforce scope-to-reference consistency. Called at load time; a
    /// violation drops the plugin from the snapshot.
    pub fn validate_scope(&self) -> Result<(), GatewayError> {
        let fail = |msg: &str| {
            Err(GatewayError::PluginConfig(format!(
                "plugin {} ({}): {}",
                self.id, self.name, msg
            )))
        };
        match self.scope {
            PluginScope::Global => {
                if self.service_id.is_some() || self.route_id.is_some() || self.consumer_id.is_some()
                {
                    return fail("global scope must not carry a reference");
                }
            }
            PluginScope::Service => {
                if self.service_id.is_none() {
                    return fail("service scope requires service_id");
                }
                if self.route_id.is_some() || self.consumer_id.is_some() {
                    return fail("service scope must not carry route/consumer references");
                }
            }
            PluginScope::Route => {
                if self.route_id.is_none() {
                    return fail("route scope requires route_id");
                }
                if self.service_id.is_some() || self.consumer_id.is_some() {
                    return fail("route scope must not carry service/consumer references");
                }
            }
            PluginScope::Consumer => {
                if self.consumer_id.is_none() {
                    return fail("consumer scope requires consumer_id");
                }
            }
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
