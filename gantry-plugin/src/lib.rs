pub mod chain;
pub mod context;
pub mod phase;
pub mod plugin;
pub mod registry;
pub mod sink;

pub use chain::Chain;
pub use context::RequestContext;
pub use phase::Phase;
pub use plugin::{Plugin, PluginFactory, PluginInstance};
pub use registry::PluginRegistry;
pub use sink::ResponseSink;
