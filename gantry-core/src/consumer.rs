use serde::{Deserialize, Serialize};

/// An API consumer. Read by adapter plugins for identifier resolution;
/// not on the hot reload path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    /// Unique identifier
    pub id: String,

    /// Username
    #[serde(default)]
    pub username: String,

    /// External correlation id
    #[serde(default)]
    pub custom_id: Option<String>,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A stored API key credential. Only the digest is persisted; the raw
/// key never leaves the request that carried it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier
    pub id: String,

    /// Owning consumer
    pub consumer_id: String,

    /// Hex digest of the key
    pub key_hash: String,

    /// Expiry, if any
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}
