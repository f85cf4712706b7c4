use crate::headers::{append_forwarded_for, strip_hop_by_hop};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use gantry_core::config::ProxyConfig;
use gantry_core::error::GatewayError;
use gantry_core::route::Route;
use gantry_core::service::Service;
use gantry_plugin::context::RequestContext;
use http::header::HOST;
use http::{HeaderMap, HeaderValue};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The forwarding engine: one shared, warm connection pool for every
/// upstream, with redirects passed through verbatim.
///
/// Timeout model: the connect timeout bounds the dial, the client-level
/// read timeout bounds each socket read (so stalls surface), and the
/// per-service read timeout bounds the wait for the response head.
/// Total body streaming time is deliberately unbounded.
pub struct ProxyEngine {
    client: reqwest::Client,
}

/// Captured upstream response head plus the streaming body.
pub struct UpstreamResponse {
    pub status: u16,
    /// Hop-by-hop stripped, X-Upstream-Latency added.
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"BoxStream<..>")
            .finish()
    }
}

impl ProxyEngine {
    pub fn new(cfg: &ProxyConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .read_timeout(Duration::from_millis(cfg.read_timeout_ms))
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(cfg.pool_idle_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;
        Ok(Self { client })
    }

    /// Compute the upstream URL: scheme://authority[base_path] +
    /// effective path + query. With `strip_path`, the first declared
    /// pattern whose literal prefix matches is trimmed.
    pub fn upstream_url(route: &Route, service: &Service, path: &str, query: Option<&str>) -> String {
        let effective = match route.strip_prefix_for(path) {
            Some(prefix) => {
                let rest = &path[prefix.len()..];
                if rest.is_empty() {
                    "/"
                } else {
                    rest
                }
            }
            None => path,
        };

        let mut url = service.url_base();
        url.push_str(effective);
        if let Some(q) = query {
            if !q.is_empty() {
                url.push('?');
                url.push_str(q);
            }
        }
        url
    }

    /// Forward the request described by `ctx` and return the response
    /// head with a streaming body. Transport failures before the first
    /// byte surface as `GatewayError::Upstream` (502 at the edge).
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        body: Option<reqwest::Body>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let url = Self::upstream_url(&ctx.route, &ctx.service, &ctx.path, ctx.query.as_deref());
        let method = reqwest::Method::from_bytes(ctx.method.as_bytes())
            .map_err(|_| GatewayError::Internal(format!("bad method {:?}", ctx.method)))?;

        let headers = self.upstream_headers(ctx);

        let mut request = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let head_timeout = Duration::from_millis(ctx.service.read_timeout_ms);
        let dispatched = Instant::now();

        let response = match tokio::time::timeout(head_timeout, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(
                    request_id = %ctx.request_id,
                    route_id = %ctx.route.id,
                    service_id = %ctx.service.id,
                    url = %url,
                    error = %e,
                    "Upstream request failed"
                );
                return Err(GatewayError::Upstream(e.to_string()));
            }
            Err(_) => {
                warn!(
                    request_id = %ctx.request_id,
                    service_id = %ctx.service.id,
                    timeout_ms = ctx.service.read_timeout_ms,
                    "Upstream response head timed out"
                );
                return Err(GatewayError::Upstream("upstream timed out".to_string()));
            }
        };

        let latency_ms = dispatched.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        let mut headers = strip_hop_by_hop(response.headers());
        if let Ok(v) = HeaderValue::from_str(&latency_ms.to_string()) {
            headers.insert("x-upstream-latency", v);
        }

        debug!(
            request_id = %ctx.request_id,
            status,
            latency_ms,
            "Upstream response head received"
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body: response.bytes_stream().boxed(),
        })
    }

    /// Build the outgoing header set: inbound headers minus hop-by-hop,
    /// plus the gateway attribution set, with Host controlled by
    /// `preserve_host`.
    fn upstream_headers(&self, ctx: &RequestContext) -> HeaderMap {
        let mut headers = strip_hop_by_hop(&ctx.headers);

        let set = |headers: &mut HeaderMap, name: &'static str, value: &str| {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(_) => warn!(header = name, "Dropping unrepresentable header value"),
            }
        };

        set(
            &mut headers,
            "x-forwarded-for",
            &append_forwarded_for(&ctx.headers, &ctx.remote_addr),
        );
        set(&mut headers, "x-forwarded-proto", &ctx.scheme);
        if let Some(ref host) = ctx.host {
            set(&mut headers, "x-forwarded-host", host);
        }
        set(&mut headers, "x-real-ip", &ctx.client_ip);
        set(&mut headers, "x-request-id", &ctx.request_id);

        if ctx.route.preserve_host {
            if let Some(ref host) = ctx.host {
                set(&mut headers, "host", host);
            }
        } else {
            // Let the client derive Host from the upstream authority.
            headers.remove(HOST);
        }

        headers
    }
}
