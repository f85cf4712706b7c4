use crate::phase::Phase;
use crate::sink::ResponseSink;
use gantry_core::radix::Params;
use gantry_core::route::Route;
use gantry_core::service::Service;
use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-request mutable state shared by all plugins in a chain.
///
/// Created at dispatch, dropped when the request completes; never
/// shared across requests. Plugin instances themselves are shared and
/// must keep any per-request state in here.
pub struct RequestContext {
    /// Per-request identifier, also sent upstream and echoed on the
    /// response.
    pub request_id: String,

    pub method: String,
    /// Normalized inbound path.
    pub path: String,
    pub query: Option<String>,
    /// Inbound headers; BeforeRequest plugins may mutate what gets
    /// forwarded.
    pub headers: HeaderMap,
    /// Extracted client address (X-Forwarded-For, X-Real-IP, or peer).
    pub client_ip: String,
    /// Immediate peer address, port stripped; appended to
    /// X-Forwarded-For when forwarding.
    pub remote_addr: String,
    /// Inbound scheme, reported via X-Forwarded-Proto.
    pub scheme: String,
    pub host: Option<String>,

    /// Matched route and service, borrowed from the snapshot.
    pub route: Arc<Route>,
    pub service: Arc<Service>,
    pub params: Params,

    /// Phase currently executing; set by the chain executor.
    pub phase: Phase,

    /// Response being assembled.
    pub sink: ResponseSink,

    started_at: Instant,
    metadata: HashMap<String, Value>,
    abort: Option<AbortState>,
}

struct AbortState {
    status: u16,
    message: String,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: String,
        method: String,
        path: String,
        query: Option<String>,
        headers: HeaderMap,
        client_ip: String,
        remote_addr: String,
        host: Option<String>,
        route: Arc<Route>,
        service: Arc<Service>,
        params: Params,
    ) -> Self {
        Self {
            request_id,
            method,
            path,
            query,
            headers,
            client_ip,
            remote_addr,
            scheme: "http".to_string(),
            host,
            route,
            service,
            params,
            phase: Phase::BeforeRequest,
            sink: ResponseSink::new(),
            started_at: Instant::now(),
            metadata: HashMap::new(),
            abort: None,
        }
    }

    // ── Metadata hand-off between plugins ───────────────────────

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// String metadata, `""` when absent or not a string.
    pub fn get_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// Integer metadata, `0` when absent or not an integer.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.metadata
            .get(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    /// Boolean metadata, `false` when absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    // ── Abort state ─────────────────────────────────────────────

    /// Terminate the chain with the given status. The plugin may write
    /// a body through the sink first; otherwise the executor emits a
    /// minimal error response.
    pub fn abort(&mut self, status: u16, message: impl Into<String>) {
        if self.abort.is_none() {
            self.abort = Some(AbortState {
                status,
                message: message.into(),
            });
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn abort_status(&self) -> Option<u16> {
        self.abort.as_ref().map(|a| a.status)
    }

    pub fn abort_message(&self) -> Option<&str> {
        self.abort.as_ref().map(|a| a.message.as_str())
    }

    // ── Timing & headers ────────────────────────────────────────

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Case-insensitive inbound header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        let route: Route = serde_json::from_value(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/a"]
        }))
        .unwrap();
        let service: Service = serde_json::from_value(serde_json::json!({
            "id": "s1", "host": "backend"
        }))
        .unwrap();
        RequestContext::new(
            "req-1".into(),
            "GET".into(),
            "/a".into(),
            None,
            HeaderMap::new(),
            "1.2.3.4".into(),
            "1.2.3.4".into(),
            None,
            Arc::new(route),
            Arc::new(service),
            Vec::new(),
        )
    }

    #[test]
    fn typed_accessors_return_defaults_on_absence() {
        let c = ctx();
        assert_eq!(c.get_str("missing"), "");
        assert_eq!(c.get_i64("missing"), 0);
        assert!(!c.get_bool("missing"));
    }

    #[test]
    fn typed_accessors_return_defaults_on_type_mismatch() {
        let mut c = ctx();
        c.set("n", serde_json::json!(42));
        assert_eq!(c.get_str("n"), "");
        assert_eq!(c.get_i64("n"), 42);
        assert!(!c.get_bool("n"));
    }

    #[test]
    fn metadata_round_trip() {
        let mut c = ctx();
        c.set("consumer_id", serde_json::json!("alice"));
        c.set("attempts", serde_json::json!(3));
        c.set("flagged", serde_json::json!(true));
        assert_eq!(c.get_str("consumer_id"), "alice");
        assert_eq!(c.get_i64("attempts"), 3);
        assert!(c.get_bool("flagged"));
    }

    #[test]
    fn first_abort_wins() {
        let mut c = ctx();
        c.abort(429, "rate limited");
        c.abort(403, "denied");
        assert!(c.is_aborted());
        assert_eq!(c.abort_status(), Some(429));
        assert_eq!(c.abort_message(), Some("rate limited"));
    }

    #[test]
    fn not_aborted_by_default() {
        let c = ctx();
        assert!(!c.is_aborted());
        assert_eq!(c.abort_status(), None);
        assert_eq!(c.abort_message(), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut c = ctx();
        c.headers
            .insert("X-API-Key", "secret".parse().unwrap());
        assert_eq!(c.header("x-api-key"), Some("secret"));
    }
}
