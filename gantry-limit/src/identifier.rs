use sha2::{Digest, Sha256};

/// Namespace tags prefixing every rate-limit identifier.
pub const CONSUMER_PREFIX: &str = "consumer:";
pub const APIKEY_PREFIX: &str = "apikey:";
pub const IP_PREFIX: &str = "ip:";

/// Digest an API key for use in rate-limit identifiers. Raw key values
/// are never stored; only the first 16 hex characters of the SHA-256
/// digest appear in keys.
pub fn hash_api_key(raw: &str) -> String {
    let mut hex = full_hash_api_key(raw);
    hex.truncate(16);
    hex
}

/// Full SHA-256 hex digest of an API key; the form the credential
/// store persists.
pub fn full_hash_api_key(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

pub fn consumer_identifier(consumer_id: &str) -> String {
    format!("{CONSUMER_PREFIX}{consumer_id}")
}

pub fn apikey_identifier(raw_key: &str) -> String {
    format!("{APIKEY_PREFIX}{}", hash_api_key(raw_key))
}

pub fn ip_identifier(client_ip: &str) -> String {
    format!("{IP_PREFIX}{client_ip}")
}
