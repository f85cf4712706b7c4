use crate::snapshot::ReloadCoordinator;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A change notification published by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub event_type: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ChangeEvent {
    /// Only service, route, and plugin changes affect the snapshot;
    /// everything else on the channel is ignored.
    pub fn affects_snapshot(&self) -> bool {
        matches!(self.entity_type.as_str(), "service" | "route" | "plugin")
    }
}

/// Subscribes to the change-notification channel and drives full
/// reloads, one message at a time. The subscription reconnects with
/// backoff when the connection drops.
pub struct ConfigWatcher {
    redis_url: String,
    channel: String,
}

impl ConfigWatcher {
    pub fn new(redis_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
        }
    }

    /// Run forever. Each received message triggers a full reload;
    /// reload failures keep the previous snapshot and are logged by
    /// the coordinator.
    pub async fn run(&self, coordinator: Arc<ReloadCoordinator>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.subscribe_and_dispatch(&coordinator).await {
                Ok(()) => {
                    warn!(channel = %self.channel, "Change stream ended, resubscribing");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(
                        channel = %self.channel,
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Change subscription failed"
                    );
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }

    async fn subscribe_and_dispatch(
        &self,
        coordinator: &Arc<ReloadCoordinator>,
    ) -> anyhow::Result<()> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to configuration changes");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Unreadable change message");
                    continue;
                }
            };
            match serde_json::from_str::<ChangeEvent>(&payload) {
                Ok(event) => self.dispatch(&event, coordinator).await,
                Err(e) => warn!(error = %e, payload = %payload, "Malformed change message"),
            }
        }
        Ok(())
    }

    /// A full reload on every snapshot-affecting message: simpler than
    /// per-entity patching and correct in the presence of
    /// cross-references.
    async fn dispatch(&self, event: &ChangeEvent, coordinator: &Arc<ReloadCoordinator>) {
        if !event.affects_snapshot() {
            debug!(
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                "Ignoring change event"
            );
            return;
        }
        info!(
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            action = %event.action,
            "Configuration changed, reloading"
        );
        coordinator.reload_logged().await;
    }
}
