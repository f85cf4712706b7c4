use http::HeaderMap;

/// Headers valid for a single transport hop only; never forwarded in
/// either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copy a header map with the hop-by-hop set removed.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Extract the client address: first X-Forwarded-For element, then
/// X-Real-IP, then the remote peer with any port stripped.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    strip_addr_port(remote_addr).to_string()
}

/// Drop the port from `host:port` / `[v6]:port` forms.
pub fn strip_addr_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        // Bracketed IPv6: keep everything inside the brackets.
        return rest.split(']').next().unwrap_or(addr);
    }
    match addr.rfind(':') {
        // A lone colon pair means IPv4:port or hostname:port; more than
        // one colon without brackets is a bare IPv6 address.
        Some(pos) if addr[..pos].contains(':') => addr,
        Some(pos) => &addr[..pos],
        None => addr,
    }
}

/// The X-Forwarded-For value to send upstream: the inbound chain with
/// the immediate peer appended.
pub fn append_forwarded_for(headers: &HeaderMap, remote_addr: &str) -> String {
    match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}, {}", existing.trim(), remote_addr)
        }
        _ => remote_addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                k.parse::<http::HeaderName>().unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn hop_by_hop_set_is_case_insensitive() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("te"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-forwarded-for"));
    }

    #[test]
    fn strip_removes_only_hop_by_hop() {
        let input = headers(&[
            ("connection", "keep-alive"),
            ("upgrade", "websocket"),
            ("content-type", "application/json"),
            ("x-api-key", "k"),
        ]);
        let out = strip_hop_by_hop(&input);
        assert!(out.get("connection").is_none());
        assert!(out.get("upgrade").is_none());
        assert_eq!(out.get("content-type").unwrap(), "application/json");
        assert_eq!(out.get("x-api-key").unwrap(), "k");
    }

    #[test]
    fn client_ip_prefers_first_xff_element() {
        let h = headers(&[("x-forwarded-for", "1.1.1.1, 9.9.9.9"), ("x-real-ip", "8.8.8.8")]);
        assert_eq!(client_ip(&h, "2.2.2.2:5000"), "1.1.1.1");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_remote() {
        let h = headers(&[("x-real-ip", "8.8.8.8")]);
        assert_eq!(client_ip(&h, "2.2.2.2:5000"), "8.8.8.8");

        let h = HeaderMap::new();
        assert_eq!(client_ip(&h, "2.2.2.2:5000"), "2.2.2.2");
    }

    #[test]
    fn strip_addr_port_handles_v4_v6_and_bare() {
        assert_eq!(strip_addr_port("2.2.2.2:5000"), "2.2.2.2");
        assert_eq!(strip_addr_port("2.2.2.2"), "2.2.2.2");
        assert_eq!(strip_addr_port("[::1]:5000"), "::1");
        assert_eq!(strip_addr_port("::1"), "::1");
        assert_eq!(strip_addr_port("backend:80"), "backend");
    }

    #[test]
    fn forwarded_for_appends_peer() {
        let h = headers(&[("x-forwarded-for", "1.1.1.1")]);
        assert_eq!(append_forwarded_for(&h, "2.2.2.2"), "1.1.1.1, 2.2.2.2");

        let h = HeaderMap::new();
        assert_eq!(append_forwarded_for(&h, "2.2.2.2"), "2.2.2.2");
    }
}
