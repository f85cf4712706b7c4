use async_trait::async_trait;
use gantry_limit::identifier::{
    apikey_identifier, consumer_identifier, full_hash_api_key, ip_identifier,
};
use gantry_limit::{RateLimitDecision, RateLimitStore, SlidingWindowLimiter, TokenBucketLimiter};
use gantry_plugin::context::RequestContext;
use gantry_plugin::phase::Phase;
use gantry_plugin::plugin::{Plugin, PluginFactory};
use gantry_store::repository::Repository;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Metadata slot an authenticator fills with the consumer id.
pub const CONSUMER_ID_KEY: &str = "consumer_id";

/// Adapter between the plugin chain and the shared limiter primitives.
pub struct RateLimitFactory {
    store: RateLimitStore,
    repo: Option<Repository>,
}

impl RateLimitFactory {
    pub fn new(store: RateLimitStore) -> Self {
        Self { store, repo: None }
    }

    /// With a repository attached, consumer-pinned limits can translate
    /// an API key into its owning consumer when no authenticator ran.
    pub fn with_repository(store: RateLimitStore, repo: Repository) -> Self {
        Self {
            store,
            repo: Some(repo),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct RateLimitConfig {
    #[serde(default = "default_algorithm")]
    algorithm: Algorithm,
    limit: u64,
    #[serde(default = "default_window")]
    window_secs: u64,
    /// Pin identifier resolution to one namespace instead of the
    /// consumer → apikey → ip fallback order.
    #[serde(default)]
    identify_by: Option<IdentifyBy>,
    #[serde(default = "default_headers_enabled")]
    headers_enabled: bool,
    /// Fail-closed on store errors when true.
    #[serde(default)]
    critical: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Algorithm {
    TokenBucket,
    SlidingWindow,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum IdentifyBy {
    Consumer,
    Apikey,
    Ip,
}

fn default_algorithm() -> Algorithm {
    Algorithm::TokenBucket
}

fn default_window() -> u64 {
    60
}

fn default_headers_enabled() -> bool {
    true
}

impl PluginFactory for RateLimitFactory {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn create(&self, config: &serde_json::Value) -> anyhow::Result<Arc<dyn Plugin>> {
        let cfg: RateLimitConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("rate-limit config error: {e}"))?;
        if cfg.limit == 0 {
            anyhow::bail!("rate-limit config error: limit must be positive");
        }
        let window = Duration::from_secs(cfg.window_secs.max(1));
        let limiter = match cfg.algorithm {
            Algorithm::TokenBucket => {
                Limiter::TokenBucket(TokenBucketLimiter::new(self.store.clone(), cfg.limit, window))
            }
            Algorithm::SlidingWindow => Limiter::SlidingWindow(SlidingWindowLimiter::new(
                self.store.clone(),
                cfg.limit,
                window,
            )),
        };
        Ok(Arc::new(RateLimitPlugin {
            cfg,
            limiter,
            repo: self.repo.clone(),
        }))
    }
}

enum Limiter {
    TokenBucket(TokenBucketLimiter),
    SlidingWindow(SlidingWindowLimiter),
}

impl Limiter {
    async fn check(&self, identifier: &str) -> Result<RateLimitDecision, gantry_limit::StoreError> {
        match self {
            Limiter::TokenBucket(l) => l.check(identifier).await,
            Limiter::SlidingWindow(l) => l.check(identifier).await,
        }
    }
}

pub struct RateLimitPlugin {
    cfg: RateLimitConfig,
    limiter: Limiter,
    repo: Option<Repository>,
}

/// Resolve the rate-limit identifier for a request: the authenticated
/// consumer, else a digest of the API key header, else the client IP.
/// A configured pin restricts resolution to a single namespace.
fn resolve_identifier(ctx: &RequestContext, pin: Option<IdentifyBy>) -> String {
    let consumer = || {
        let id = ctx.get_str(CONSUMER_ID_KEY);
        (!id.is_empty()).then(|| consumer_identifier(id))
    };
    let apikey = || ctx.header("x-api-key").map(apikey_identifier);
    let ip = || ip_identifier(&ctx.client_ip);

    match pin {
        Some(IdentifyBy::Consumer) => consumer().unwrap_or_else(ip),
        Some(IdentifyBy::Apikey) => apikey().unwrap_or_else(ip),
        Some(IdentifyBy::Ip) => ip(),
        None => consumer().or_else(apikey).unwrap_or_else(ip),
    }
}

impl RateLimitPlugin {
    /// Consumer identifier for pinned resolution: the authenticator's
    /// metadata slot, else a credential-store translation of the API
    /// key header.
    async fn pinned_consumer(&self, ctx: &RequestContext) -> Option<String> {
        let id = ctx.get_str(CONSUMER_ID_KEY);
        if !id.is_empty() {
            return Some(consumer_identifier(id));
        }
        let repo = self.repo.as_ref()?;
        let raw = ctx.header("x-api-key")?;
        let key = repo
            .find_api_key(&full_hash_api_key(raw))
            .await
            .ok()
            .flatten()?;
        if key.is_expired(chrono::Utc::now()) {
            return None;
        }
        let consumer = repo.get_consumer(&key.consumer_id).await.ok().flatten()?;
        Some(consumer_identifier(&consumer.id))
    }

    async fn identifier(&self, ctx: &RequestContext) -> String {
        match self.cfg.identify_by {
            Some(IdentifyBy::Consumer) => self
                .pinned_consumer(ctx)
                .await
                .unwrap_or_else(|| ip_identifier(&ctx.client_ip)),
            pin => resolve_identifier(ctx, pin),
        }
    }

    fn write_headers(&self, ctx: &mut RequestContext, decision: &RateLimitDecision) {
        let set = |ctx: &mut RequestContext, name: &str, value: String| {
            if let Err(e) = ctx.sink.set_header(name, &value) {
                debug!(header = name, error = %e, "Skipping rate limit header");
            }
        };
        set(ctx, "x-ratelimit-limit", self.cfg.limit.to_string());
        set(ctx, "x-ratelimit-remaining", decision.remaining.to_string());
        set(ctx, "x-ratelimit-reset", decision.reset_at.to_string());
        if !decision.allowed {
            let retry_secs = decision.retry_after.as_secs_f64().ceil() as u64;
            set(ctx, "retry-after", retry_secs.to_string());
        }
    }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> anyhow::Result<()> {
        if ctx.phase != Phase::BeforeRequest {
            return Ok(());
        }

        let identifier = self.identifier(ctx).await;

        match self.limiter.check(&identifier).await {
            Ok(decision) => {
                if self.cfg.headers_enabled {
                    self.write_headers(ctx, &decision);
                }
                if !decision.allowed {
                    debug!(
                        request_id = %ctx.request_id,
                        identifier = %identifier,
                        "Rate limit exceeded"
                    );
                    ctx.abort(429, "rate limit exceeded");
                }
                Ok(())
            }
            Err(e) => {
                if self.cfg.critical {
                    warn!(
                        request_id = %ctx.request_id,
                        error = %e,
                        "Rate limit store error, failing closed"
                    );
                    ctx.abort(503, "rate limit store unavailable");
                } else {
                    warn!(
                        request_id = %ctx.request_id,
                        error = %e,
                        "Rate limit store error, failing open"
                    );
                }
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

    fn context(headers: &[(&str, &str)]) -> RequestContext {
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
            "/a".into(),
            None,
            map,
            "10.0.0.9".into(),
            "10.0.0.9".into(),
            None,
            Arc::new(route),
            Arc::new(service),
            Vec::new(),
        )
    }

    // ── Identifier resolution ───────────────────────────────────

    #[test]
    fn consumer_metadata_wins() {
        let mut ctx = context(&[("x-api-key", "abc")]);
        ctx.set(CONSUMER_ID_KEY, serde_json::json!("alice"));
        assert_eq!(resolve_identifier(&ctx, None), "consumer:alice");
    }

    #[test]
    fn api_key_header_is_hashed() {
        let ctx = context(&[("x-api-key", "super-secret")]);
        let id = resolve_identifier(&ctx, None);
        assert!(id.starts_with("apikey:"));
        assert!(!id.contains("super-secret"));
        assert_eq!(id.len(), "apikey:".len() + 16);
    }

    #[test]
    fn falls_back_to_client_ip() {
        let ctx = context(&[]);
        assert_eq!(resolve_identifier(&ctx, None), "ip:10.0.0.9");
    }

    #[test]
    fn pinned_namespace_skips_the_fallback_chain() {
        let mut ctx = context(&[("x-api-key", "abc")]);
        ctx.set(CONSUMER_ID_KEY, serde_json::json!("alice"));
        assert_eq!(resolve_identifier(&ctx, Some(IdentifyBy::Ip)), "ip:10.0.0.9");

        let id = resolve_identifier(&ctx, Some(IdentifyBy::Apikey));
        assert!(id.starts_with("apikey:"));
    }

    #[test]
    fn pinned_consumer_without_auth_falls_back_to_ip() {
        let ctx = context(&[]);
        assert_eq!(
            resolve_identifier(&ctx, Some(IdentifyBy::Consumer)),
            "ip:10.0.0.9"
        );
    }

    // ── Config parsing ──────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let cfg: RateLimitConfig = serde_json::from_value(serde_json::json!({
            "limit": 100
        }))
        .unwrap();
        assert_eq!(cfg.algorithm, Algorithm::TokenBucket);
        assert_eq!(cfg.window_secs, 60);
        assert!(cfg.headers_enabled);
        assert!(!cfg.critical);
        assert!(cfg.identify_by.is_none());
    }

    #[test]
    fn config_parses_sliding_window() {
        let cfg: RateLimitConfig = serde_json::from_value(serde_json::json!({
            "algorithm": "sliding_window", "limit": 5, "window_secs": 2,
            "identify_by": "ip", "critical": true
        }))
        .unwrap();
        assert_eq!(cfg.algorithm, Algorithm::SlidingWindow);
        assert_eq!(cfg.identify_by, Some(IdentifyBy::Ip));
        assert!(cfg.critical);
    }

    #[test]
    fn config_requires_a_limit() {
        let parsed: Result<RateLimitConfig, _> =
            serde_json::from_value(serde_json::json!({ "window_secs": 60 }));
        assert!(parsed.is_err());
    }

    // ── End-to-end against a live store ─────────────────────────

    #[tokio::test]
    #[ignore = "requires a local Redis at 127.0.0.1:6379"]
    async fn denial_aborts_with_429_and_headers() {
        let store = RateLimitStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let plugin = RateLimitFactory::new(store)
            .create(&serde_json::json!({ "limit": 2, "window_secs": 60 }))
            .unwrap();

        let ip = format!("10.1.{}.{}", fastrand_byte(), fastrand_byte());
        for _ in 0..2 {
            let mut ctx = context(&[]);
            ctx.client_ip = ip.clone();
            plugin.execute(&mut ctx).await.unwrap();
            assert!(!ctx.is_aborted());
        }

        let mut ctx = context(&[]);
        ctx.client_ip = ip;
        plugin.execute(&mut ctx).await.unwrap();
        assert!(ctx.is_aborted());
        assert_eq!(ctx.abort_status(), Some(429));
        assert_eq!(
            ctx.sink.headers().get("x-ratelimit-remaining").unwrap(),
            "0"
        );
        assert!(ctx.sink.headers().get("retry-after").is_some());
    }

    fn fastrand_byte() -> u8 {
        use std::time::{SystemTime, UNIX_EPOCH};
        (SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
            % 251) as u8
    }
}
