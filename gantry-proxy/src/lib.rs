pub mod engine;
pub mod headers;

pub use engine::{ProxyEngine, UpstreamResponse};
