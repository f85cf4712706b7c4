use crate::context::RequestContext;
use crate::phase::Phase;
use crate::plugin::PluginInstance;
use gantry_core::error::GatewayError;
use gantry_core::route::Route;
use gantry_core::service::Service;
use std::sync::Arc;
use tracing::{debug, warn};

/// The plugin chain for one request: instances admitted by scope,
/// sorted ascending by priority (stable on ties).
///
/// BeforeRequest runs the chain forward; AfterResponse runs the same
/// chain in reverse, LIFO around the proxy step.
pub struct Chain {
    instances: Vec<Arc<PluginInstance>>,
}

impl Chain {
    /// Select and order the instances that apply to this route/service
    /// pair.
    pub fn build(all: &[Arc<PluginInstance>], route: &Route, service: &Service) -> Self {
        let mut instances: Vec<Arc<PluginInstance>> = all
            .iter()
            .filter(|inst| inst.admits(route, service))
            .cloned()
            .collect();
        instances.sort_by_key(|inst| inst.priority);
        Self { instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Run the BeforeRequest phase. Stops at the first abort; a
    /// critical plugin error surfaces to the dispatcher, a non-critical
    /// one is logged and skipped.
    ///
    /// When a plugin aborted, the abort status and message are written
    /// to the sink unless the plugin already wrote a response body.
    pub async fn run_before(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        ctx.phase = Phase::BeforeRequest;
        for inst in &self.instances {
            if ctx.is_aborted() {
                break;
            }
            debug!(plugin = %inst.name, phase = %ctx.phase, "Executing plugin");
            if let Err(e) = inst.plugin.execute(ctx).await {
                if inst.critical {
                    return Err(GatewayError::PluginExecution {
                        plugin: inst.name.clone(),
                        phase: ctx.phase.as_str().to_string(),
                        message: e.to_string(),
                    });
                }
                warn!(
                    plugin = %inst.name,
                    phase = %ctx.phase,
                    request_id = %ctx.request_id,
                    error = %e,
                    "Non-critical plugin error, continuing"
                );
            }
        }

        if ctx.is_aborted() {
            self.finalize_abort(ctx);
        }
        Ok(())
    }

    /// Run the AfterResponse phase in reverse order. Always runs, even
    /// after an abort, so observers see the outcome. Critical errors
    /// still surface; non-critical ones are logged.
    pub async fn run_after(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        ctx.phase = Phase::AfterResponse;
        for inst in self.instances.iter().rev() {
            debug!(plugin = %inst.name, phase = %ctx.phase, "Executing plugin");
            if let Err(e) = inst.plugin.execute(ctx).await {
                if inst.critical {
                    return Err(GatewayError::PluginExecution {
                        plugin: inst.name.clone(),
                        phase: ctx.phase.as_str().to_string(),
                        message: e.to_string(),
                    });
                }
                warn!(
                    plugin = %inst.name,
                    phase = %ctx.phase,
                    request_id = %ctx.request_id,
                    error = %e,
                    "Non-critical plugin error, continuing"
                );
            }
        }
        Ok(())
    }

    /// Materialize the abort into the sink when the aborting plugin did
    /// not write its own body. 204 aborts carry no body at all.
    fn finalize_abort(&self, ctx: &mut RequestContext) {
        let Some(status) = ctx.abort_status() else {
            return;
        };
        ctx.sink.write_header(status);
        if !ctx.sink.has_body() && status != 204 {
            let message = ctx.abort_message().unwrap_or("request aborted").to_string();
            let _ = ctx.sink.set_header("content-type", "application/json");
            let body = serde_json::json!({ "error": message, "status": status }).to_string();
            ctx.sink.write(body.as_bytes());
        }
    }
}
