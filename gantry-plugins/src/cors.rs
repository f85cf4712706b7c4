use async_trait::async_trait;
use gantry_plugin::context::RequestContext;
use gantry_plugin::phase::Phase;
use gantry_plugin::plugin::{Plugin, PluginFactory};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const ORIGIN_KEY: &str = "cors_allow_origin";

pub struct CorsFactory;

#[derive(Debug, Deserialize, Clone)]
struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    allowed_origins: Vec<String>,
    #[serde(default = "default_allowed_methods")]
    allowed_methods: Vec<String>,
    #[serde(default)]
    allowed_headers: Vec<String>,
    #[serde(default)]
    exposed_headers: Vec<String>,
    #[serde(default)]
    allow_credentials: bool,
    #[serde(default = "default_max_age")]
    max_age: u64,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "PATCH".to_string(),
        "OPTIONS".to_string(),
    ]
}

fn default_max_age() -> u64 {
    86400
}

impl PluginFactory for CorsFactory {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn create(&self, config: &serde_json::Value) -> anyhow::Result<Arc<dyn Plugin>> {
        let cfg: CorsConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("cors config error: {e}"))?;
        if cfg.allow_credentials && cfg.allowed_origins.iter().any(|o| o == "*") {
            anyhow::bail!("cors config error: allow_credentials cannot be combined with a wildcard origin");
        }
        Ok(Arc::new(CorsPlugin { cfg }))
    }
}

pub struct CorsPlugin {
    cfg: CorsConfig,
}

impl CorsPlugin {
    /// The Access-Control-Allow-Origin value for `origin`, or None when
    /// the origin is not allowed. A lone `*` entry reflects `*`; exact
    /// and `*.suffix` entries reflect the request origin.
    fn resolve_origin(&self, origin: &str) -> Option<String> {
        for allowed in &self.cfg.allowed_origins {
            if allowed == "*" {
                return Some("*".to_string());
            }
            if allowed == origin {
                return Some(origin.to_string());
            }
            if let Some(suffix) = allowed.strip_prefix("*.") {
                // Match against the origin's host portion.
                let host = origin
                    .split("://")
                    .nth(1)
                    .unwrap_or(origin)
                    .split([':', '/'])
                    .next()
                    .unwrap_or("");
                if host == suffix || host.ends_with(&format!(".{suffix}")) {
                    return Some(origin.to_string());
                }
            }
        }
        None
    }

    fn is_preflight(ctx: &RequestContext) -> bool {
        ctx.method.eq_ignore_ascii_case("OPTIONS")
            && ctx.header("access-control-request-method").is_some()
    }

    fn emit_common(&self, ctx: &mut RequestContext, origin: &str) {
        let set = |ctx: &mut RequestContext, name: &str, value: &str| {
            if let Err(e) = ctx.sink.set_header(name, value) {
                debug!(header = name, error = %e, "Skipping CORS header");
            }
        };
        set(ctx, "access-control-allow-origin", origin);
        if self.cfg.allow_credentials {
            set(ctx, "access-control-allow-credentials", "true");
        }
        if !self.cfg.exposed_headers.is_empty() {
            let exposed = self.cfg.exposed_headers.join(", ");
            set(ctx, "access-control-expose-headers", &exposed);
        }
    }

    fn emit_preflight(&self, ctx: &mut RequestContext, origin: &str) {
        self.emit_common(ctx, origin);
        let set = |ctx: &mut RequestContext, name: &str, value: &str| {
            if let Err(e) = ctx.sink.set_header(name, value) {
                debug!(header = name, error = %e, "Skipping CORS header");
            }
        };
        let methods = self.cfg.allowed_methods.join(", ");
        set(ctx, "access-control-allow-methods", &methods);
        if !self.cfg.allowed_headers.is_empty() {
            let headers = self.cfg.allowed_headers.join(", ");
            set(ctx, "access-control-allow-headers", &headers);
        } else {
            // Nothing configured: echo whatever the preflight asked for.
            let requested = ctx
                .header("access-control-request-headers")
                .map(str::to_string);
            if let Some(requested) = requested {
                set(ctx, "access-control-allow-headers", &requested);
            }
        }
        let max_age = self.cfg.max_age.to_string();
        set(ctx, "access-control-max-age", &max_age);
    }
}

#[async_trait]
impl Plugin for CorsPlugin {
    fn name(&self) -> &str {
        "cors"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        match ctx.phase {
            Phase::BeforeRequest => {
                let Some(origin) = ctx.header("origin").map(str::to_string) else {
                    return Ok(()); // not a CORS request
                };

                let resolved = self.resolve_origin(&origin);

                if Self::is_preflight(ctx) {
                    // Preflights never reach the upstream, matched
                    // origin or not; an unmatched one gets a bare 204.
                    if let Some(ref allow) = resolved {
                        self.emit_preflight(ctx, allow);
                    }
                    ctx.abort(204, "cors preflight");
                    return Ok(());
                }

                if let Some(allow) = resolved {
                    ctx.set(ORIGIN_KEY, serde_json::json!(allow));
                }
                Ok(())
            }
            Phase::AfterResponse => {
                let allow = ctx.get_str(ORIGIN_KEY).to_string();
                if !allow.is_empty() {
                    self.emit_common(ctx, &allow);
                }
                Ok(())
            }
        }
    }
}
