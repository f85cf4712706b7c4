use thiserror::Error;

/// Unified error type for the Gantry data plane.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No route matched: {0}")]
    NoRoute(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service disabled: {0}")]
    ServiceDisabled(String),

    #[error("Plugin config error: {0}")]
    PluginConfig(String),

    #[error("Plugin {plugin} failed in {phase}: {message}")]
    PluginExecution {
        plugin: String,
        phase: String,
        message: String,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Rate limit store error: {0}")]
    RateLimitStore(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Reload aborted: {0}")]
    Reload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to the HTTP status code the gateway surfaces for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NoRoute(_) => 404,
            GatewayError::ServiceNotFound(_) => 404,
            GatewayError::ServiceDisabled(_) => 404,
            GatewayError::Upstream(_) => 502,
            GatewayError::RateLimitStore(_) => 503,
            GatewayError::Store(_) => 503,
            GatewayError::PluginExecution { .. } => 500,
            _ => 500,
        }
    }

    /// Small JSON error body sent to the client.
    pub fn to_json_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let msg = match self {
            // Route-resolution failures share one body so unexposed
            // routes stay indistinguishable from unknown paths.
            GatewayError::NoRoute(_)
            | GatewayError::ServiceNotFound(_)
            | GatewayError::ServiceDisabled(_) => "no route matched".to_string(),
            other => other.to_string(),
        };
        serde_json::json!({ "error": msg, "status": status })
            .to_string()
            .into_bytes()
    }
}
