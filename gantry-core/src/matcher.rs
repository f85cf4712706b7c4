use crate::error::GatewayError;
use crate::radix::{Params, PathTrie};
use crate::route::Route;
use crate::service::Service;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Method- and host-aware routing over the path trie.
///
/// A matcher is built from one configuration snapshot and immutable
/// afterwards; reloads construct a fresh one.
pub struct RouteMatcher {
    trie: PathTrie<Arc<Route>>,
    services: HashMap<String, Arc<Service>>,
}

/// Result of a successful match.
#[derive(Debug)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub service: Arc<Service>,
    pub params: Params,
}

impl RouteMatcher {
    /// Build the matcher from enabled routes and their services.
    /// Routes with invalid patterns are skipped with a warning rather
    /// than failing the whole build.
    pub fn build(routes: Vec<Route>, services: Vec<Service>) -> Self {
        let services: HashMap<String, Arc<Service>> = services
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();

        let mut trie = PathTrie::new();
        for route in routes {
            if !route.enabled {
                continue;
            }
            let route = Arc::new(route);
            for path in &route.paths {
                if let Err(e) = trie.insert(path, Arc::clone(&route)) {
                    warn!(route_id = %route.id, path = %path, error = %e, "Skipping route path");
                }
            }
        }

        Self { trie, services }
    }

    /// Match an incoming request. Every failure mode maps to NotFound
    /// at the edge so unexposed routes stay hidden.
    pub fn match_request(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
    ) -> Result<RouteMatch, GatewayError> {
        let path = normalize_path(path);

        let Some((route, params)) = self.trie.search(&path) else {
            return Err(GatewayError::NoRoute(path));
        };
        let route = Arc::clone(route);

        if !route.method_allowed(method) {
            debug!(route_id = %route.id, method = %method, "Method not in route's allow list");
            return Err(GatewayError::NoRoute(path));
        }

        if !route.hosts.is_empty() {
            let bare_host = host.map(strip_port);
            match bare_host {
                Some(h) if route.host_allowed(h) => {}
                _ => {
                    debug!(route_id = %route.id, host = ?host, "Host not in route's allow list");
                    return Err(GatewayError::NoRoute(path));
                }
            }
        }

        let Some(service) = self.services.get(&route.service_id) else {
            debug!(route_id = %route.id, service_id = %route.service_id, "Route references unknown service");
            return Err(GatewayError::ServiceNotFound(route.service_id.clone()));
        };
        if !service.enabled {
            debug!(service_id = %service.id, "Service disabled");
            return Err(GatewayError::ServiceDisabled(service.id.clone()));
        }

        Ok(RouteMatch {
            route,
            service: Arc::clone(service),
            params,
        })
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

/// Enforce a leading slash and drop a single trailing slash except at
/// the root.
pub fn normalize_path(path: &str) -> String {
    let mut p = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// Drop the `:port` suffix from a host header value.
pub fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(json: serde_json::Value) -> Route {
        serde_json::from_value(json).unwrap()
    }

    fn service(json: serde_json::Value) -> Service {
        serde_json::from_value(json).unwrap()
    }

    fn simple_setup() -> RouteMatcher {
        RouteMatcher::build(
            vec![
                route(serde_json::json!({
                    "id": "r1", "service_id": "s1",
                    "paths": ["/api/users"], "methods": ["GET"]
                })),
                route(serde_json::json!({
                    "id": "r2", "service_id": "s1", "paths": ["/api/users/:id"]
                })),
            ],
            vec![service(serde_json::json!({ "id": "s1", "host": "backend" }))],
        )
    }

    #[test]
    fn match_returns_route_service_and_params() {
        let m = simple_setup();
        let hit = m.match_request("GET", "/api/users/42", None).unwrap();
        assert_eq!(hit.route.id, "r2");
        assert_eq!(hit.service.id, "s1");
        assert_eq!(hit.params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn unmatched_path_is_no_route() {
        let m = simple_setup();
        let err = m.match_request("GET", "/nope", None).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn method_miss_is_not_found_not_405() {
        let m = simple_setup();
        let err = m.match_request("POST", "/api/users", None).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn host_filter_strips_port() {
        let m = RouteMatcher::build(
            vec![route(serde_json::json!({
                "id": "r1", "service_id": "s1",
                "paths": ["/a"], "hosts": ["api.example.com"]
            }))],
            vec![service(serde_json::json!({ "id": "s1", "host": "backend" }))],
        );
        assert!(m.match_request("GET", "/a", Some("api.example.com:8080")).is_ok());
        assert!(m.match_request("GET", "/a", Some("other.com")).is_err());
        assert!(
            m.match_request("GET", "/a", None).is_err(),
            "host-constrained route must not match a request without a host"
        );
    }

    #[test]
    fn wildcard_host_filter() {
        let m = RouteMatcher::build(
            vec![route(serde_json::json!({
                "id": "r1", "service_id": "s1",
                "paths": ["/a"], "hosts": ["*.example.com"]
            }))],
            vec![service(serde_json::json!({ "id": "s1", "host": "backend" }))],
        );
        assert!(m.match_request("GET", "/a", Some("foo.example.com")).is_ok());
        assert!(m.match_request("GET", "/a", Some("example.com")).is_ok());
        assert!(m.match_request("GET", "/a", Some("example.org")).is_err());
    }

    #[test]
    fn disabled_service_is_a_non_match() {
        let m = RouteMatcher::build(
            vec![route(serde_json::json!({
                "id": "r1", "service_id": "s1", "paths": ["/a"]
            }))],
            vec![service(serde_json::json!({
                "id": "s1", "host": "backend", "enabled": false
            }))],
        );
        let err = m.match_request("GET", "/a", None).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn missing_service_is_a_non_match() {
        let m = RouteMatcher::build(
            vec![route(serde_json::json!({
                "id": "r1", "service_id": "ghost", "paths": ["/a"]
            }))],
            vec![],
        );
        let err = m.match_request("GET", "/a", None).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn disabled_route_is_skipped_at_build() {
        let m = RouteMatcher::build(
            vec![route(serde_json::json!({
                "id": "r1", "service_id": "s1", "paths": ["/a"], "enabled": false
            }))],
            vec![service(serde_json::json!({ "id": "s1", "host": "backend" }))],
        );
        assert!(m.match_request("GET", "/a", None).is_err());
    }

    #[test]
    fn trailing_slash_matches_like_bare_path() {
        let m = simple_setup();
        let a = m.match_request("GET", "/api/users", None).unwrap();
        let b = m.match_request("GET", "/api/users/", None).unwrap();
        assert_eq!(a.route.id, b.route.id);
    }

    #[test]
    fn normalize_path_rules() {
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }
}
