pub mod config;
pub mod consumer;
pub mod error;
pub mod matcher;
pub mod plugin_config;
pub mod radix;
pub mod route;
pub mod service;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use matcher::{RouteMatch, RouteMatcher};
pub use plugin_config::{PluginConfig, PluginScope};
pub use route::Route;
pub use service::Service;
