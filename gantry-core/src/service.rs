use serde::{Deserialize, Serialize};

/// An abstract backend destination. Every route forwards to exactly one
/// service; a disabled service makes its routes unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique service identifier
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Upstream scheme
    #[serde(default)]
    pub scheme: Scheme,

    /// Upstream host
    pub host: String,

    /// Upstream port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional path prefix prepended to every forwarded request
    #[serde(default)]
    pub base_path: Option<String>,

    /// Upstream read timeout (milliseconds)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Whether this service accepts traffic
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Upstream scheme: plain or TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Default port for the scheme, used to keep authorities canonical.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl Service {
    /// The upstream authority: `host` or `host:port` when the port is
    /// not the scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `scheme://authority` plus any base path, without a trailing slash.
    pub fn url_base(&self) -> String {
        let mut base = format!("{}://{}", self.scheme.as_str(), self.authority());
        if let Some(ref bp) = self.base_path {
            let bp = bp.trim_end_matches('/');
            if !bp.is_empty() {
                if !bp.starts_with('/') {
                    base.push('/');
                }
                base.push_str(bp);
            }
        }
        base
    }
}

fn default_port() -> u16 {
    80
}

fn default_read_timeout() -> u64 {
    30000
}

fn default_enabled() -> bool {
    true
}
