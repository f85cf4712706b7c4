use async_trait::async_trait;
use gantry_plugin::context::RequestContext;
use gantry_plugin::phase::Phase;
use gantry_plugin::plugin::{Plugin, PluginFactory};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Header values never written to logs, even with header logging on.
const SENSITIVE_HEADERS: [&str; 7] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "proxy-authorization",
    "x-auth-token",
];

const SKIP_KEY: &str = "request_logger_skip";

pub struct RequestLoggerFactory;

#[derive(Debug, Deserialize, Clone)]
struct RequestLoggerConfig {
    #[serde(default)]
    log_headers: bool,
    #[serde(default)]
    log_query: bool,
    /// Paths excluded from logging, matched exactly.
    #[serde(default)]
    excluded_paths: Vec<String>,
}

impl PluginFactory for RequestLoggerFactory {
    fn name(&self) -> &'static str {
        "request-logger"
    }

    fn create(&self, config: &serde_json::Value) -> anyhow::Result<Arc<dyn Plugin>> {
        let cfg: RequestLoggerConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("request-logger config error: {e}"))?;
        Ok(Arc::new(RequestLoggerPlugin { cfg }))
    }
}

pub struct RequestLoggerPlugin {
    cfg: RequestLoggerConfig,
}

impl RequestLoggerPlugin {
    fn redacted_headers(ctx: &RequestContext) -> String {
        let mut out = serde_json::Map::new();
        for (name, value) in &ctx.headers {
            let shown = if is_sensitive(name.as_str()) {
                "[REDACTED]"
            } else {
                value.to_str().unwrap_or("[binary]")
            };
            out.insert(name.as_str().to_string(), serde_json::json!(shown));
        }
        serde_json::Value::Object(out).to_string()
    }
}

pub(crate) fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[async_trait]
impl Plugin for RequestLoggerPlugin {
    fn name(&self) -> &str {
        "request-logger"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        match ctx.phase {
            Phase::BeforeRequest => {
                if self.cfg.excluded_paths.iter().any(|p| p == &ctx.path) {
                    ctx.set(SKIP_KEY, serde_json::json!(true));
                    return Ok(());
                }

                let user_agent = ctx.header("user-agent").unwrap_or("").to_string();
                let query = if self.cfg.log_query {
                    ctx.query.clone().unwrap_or_default()
                } else {
                    String::new()
                };
                let headers = if self.cfg.log_headers {
                    Self::redacted_headers(ctx)
                } else {
                    String::new()
                };

                info!(
                    request_id = %ctx.request_id,
                    method = %ctx.method,
                    path = %ctx.path,
                    query = %query,
                    remote_addr = %ctx.remote_addr,
                    client_ip = %ctx.client_ip,
                    user_agent = %user_agent,
                    route_id = %ctx.route.id,
                    service_id = %ctx.service.id,
                    headers = %headers,
                    "Request received"
                );
                Ok(())
            }
            Phase::AfterResponse => {
                if ctx.get_bool(SKIP_KEY) {
                    return Ok(());
                }
                info!(
                    request_id = %ctx.request_id,
                    status = ctx.sink.status(),
                    bytes = ctx.sink.bytes_written(),
                    elapsed_ms = ctx.elapsed().as_millis() as u64,
                    aborted = ctx.is_aborted(),
                    "Request completed"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::route::Route;
    use gantry_core::service::Service;
    use http::HeaderMap;

    fn context(path: &str, headers: &[(&str, &str)]) -> RequestContext {
        let route: Route = serde_json::from_value(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/a"]
        }))
        .unwrap();
        let service: Service =
            serde_json::from_value(serde_json::json!({ "id": "s1", "host": "backend" })).unwrap();
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(k.parse::<http::HeaderName>().unwrap(), v.parse().unwrap());
        }
        RequestContext::new(
            "req-1".into(),
            "GET".into(),
            path.into(),
            None,
            map,
            "1.2.3.4".into(),
            "1.2.3.4".into(),
            None,
            Arc::new(route),
            Arc::new(service),
            Vec::new(),
        )
    }

    #[test]
    fn sensitive_header_list() {
        assert!(is_sensitive("Authorization"));
        assert!(is_sensitive("COOKIE"));
        assert!(is_sensitive("x-api-key"));
        assert!(is_sensitive("X-Auth-Token"));
        assert!(!is_sensitive("content-type"));
        assert!(!is_sensitive("x-request-id"));
    }

    #[test]
    fn redaction_hides_values_but_keeps_names() {
        let ctx = context(
            "/a",
            &[("authorization", "Bearer secret-token"), ("accept", "application/json")],
        );
        let logged = RequestLoggerPlugin::redacted_headers(&ctx);
        assert!(logged.contains("authorization"));
        assert!(!logged.contains("secret-token"));
        assert!(logged.contains("[REDACTED]"));
        assert!(logged.contains("application/json"));
    }

    #[tokio::test]
    async fn excluded_path_sets_skip_marker() {
        let p = RequestLoggerFactory
            .create(&serde_json::json!({ "excluded_paths": ["/health"] }))
            .unwrap();
        let mut ctx = context("/health", &[]);
        p.execute(&mut ctx).await.unwrap();
        assert!(ctx.get_bool(SKIP_KEY));

        let mut ctx = context("/health/deep", &[]);
        p.execute(&mut ctx).await.unwrap();
        assert!(!ctx.get_bool(SKIP_KEY), "exclusion is exact-match only");
    }

    #[tokio::test]
    async fn both_phases_run_clean() {
        let p = RequestLoggerFactory
            .create(&serde_json::json!({ "log_headers": true, "log_query": true }))
            .unwrap();
        let mut ctx = context("/a", &[("user-agent", "curl/8")]);
        p.execute(&mut ctx).await.unwrap();
        ctx.phase = Phase::AfterResponse;
        p.execute(&mut ctx).await.unwrap();
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(RequestLoggerFactory
            .create(&serde_json::json!({ "excluded_paths": 42 }))
            .is_err());
    }
}
