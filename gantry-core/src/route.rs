use serde::{Deserialize, Serialize};

/// A Route defines how incoming requests are matched and which service
/// they forward to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Unique route identifier
    pub id: String,

    /// Service this route forwards to
    pub service_id: String,

    /// Path patterns (OR match). Segments are static literals, `:name`
    /// parameters, or a trailing `*` wildcard.
    pub paths: Vec<String>,

    /// Allowed HTTP methods (empty = all methods)
    #[serde(default)]
    pub methods: Vec<String>,

    /// Host patterns (empty = any host). `*.suffix` matches subdomains.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Strip the matched pattern's literal prefix before forwarding
    #[serde(default)]
    pub strip_path: bool,

    /// Forward the inbound Host header instead of the upstream authority
    #[serde(default)]
    pub preserve_host: bool,

    /// Whether this route is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Route {
    /// Check if a given HTTP method is allowed by this route.
    pub fn method_allowed(&self, method: &str) -> bool {
        if self.methods.is_empty() {
            return true;
        }
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Check if the request host (port already stripped) satisfies the
    /// route's host list. `*.suffix` admits `suffix` itself and any
    /// `name.suffix` subdomain.
    pub fn host_allowed(&self, host: &str) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        self.hosts.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                host == suffix || host.ends_with(&format!(".{suffix}"))
            } else {
                pattern == host
            }
        })
    }

    /// The literal prefix of `pattern` up to the first parameter or
    /// wildcard segment. Used by strip-path rewriting.
    pub fn literal_prefix(pattern: &str) -> &str {
        match pattern.find([':', '*']) {
            Some(pos) => pattern[..pos].trim_end_matches('/'),
            None => pattern.trim_end_matches('/'),
        }
    }

    /// The prefix to strip for `path`: the first declared pattern whose
    /// literal prefix is a path-boundary prefix of `path`. Patterns are
    /// tried in declaration order.
    pub fn strip_prefix_for(&self, path: &str) -> Option<&str> {
        if !self.strip_path {
            return None;
        }
        self.paths.iter().map(|p| Self::literal_prefix(p)).find(|prefix| {
            !prefix.is_empty()
                && path.starts_with(prefix)
                && (path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/')
        })
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(json: serde_json::Value) -> Route {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn empty_methods_allow_everything() {
        let r = route(serde_json::json!({ "id": "r1", "service_id": "s1", "paths": ["/a"] }));
        assert!(r.method_allowed("GET"));
        assert!(r.method_allowed("DELETE"));
    }

    #[test]
    fn method_list_is_case_insensitive() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/a"], "methods": ["GET", "POST"]
        }));
        assert!(r.method_allowed("get"));
        assert!(r.method_allowed("POST"));
        assert!(!r.method_allowed("PUT"));
    }

    #[test]
    fn host_wildcard_matches_suffix_and_subdomains() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/a"], "hosts": ["*.example.com"]
        }));
        assert!(r.host_allowed("example.com"));
        assert!(r.host_allowed("api.example.com"));
        assert!(r.host_allowed("a.b.example.com"));
        assert!(!r.host_allowed("example.org"));
        assert!(!r.host_allowed("badexample.com"));
    }

    #[test]
    fn host_exact_match() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/a"], "hosts": ["api.example.com"]
        }));
        assert!(r.host_allowed("api.example.com"));
        assert!(!r.host_allowed("www.example.com"));
    }

    #[test]
    fn literal_prefix_stops_at_param() {
        assert_eq!(Route::literal_prefix("/api/users/:id"), "/api/users");
        assert_eq!(Route::literal_prefix("/api/*"), "/api");
        assert_eq!(Route::literal_prefix("/api/orders"), "/api/orders");
        assert_eq!(Route::literal_prefix("/:id"), "");
    }

    #[test]
    fn strip_prefix_uses_declaration_order() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1",
            "paths": ["/api", "/api/users"], "strip_path": true
        }));
        // "/api" is declared first, so it wins even though "/api/users"
        // is the longer literal prefix.
        assert_eq!(r.strip_prefix_for("/api/users/42"), Some("/api"));
    }

    #[test]
    fn strip_prefix_respects_segment_boundaries() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/api"], "strip_path": true
        }));
        assert_eq!(r.strip_prefix_for("/api/orders/7"), Some("/api"));
        assert_eq!(r.strip_prefix_for("/api"), Some("/api"));
        assert_eq!(r.strip_prefix_for("/apiv2/orders"), None);
    }

    #[test]
    fn strip_prefix_disabled() {
        let r = route(serde_json::json!({
            "id": "r1", "service_id": "s1", "paths": ["/api"]
        }));
        assert_eq!(r.strip_prefix_for("/api/orders"), None);
    }
}
