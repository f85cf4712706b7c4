use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use gantry_limit::RateLimitStore;
use gantry_store::repository::Repository;
use gantry_store::snapshot::SnapshotHandle;
use std::sync::Arc;

/// State for the built-in operational endpoints, exempt from proxying.
#[derive(Clone)]
pub struct OpsState {
    pub snapshot: Arc<SnapshotHandle>,
    pub repo: Repository,
    pub limit_store: RateLimitStore,
}

pub fn ops_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Store reachability and pool statistics; 503 when any dependency is
/// down.
async fn health(State(state): State<OpsState>) -> impl IntoResponse {
    let database = state.repo.ping().await;
    let rate_limit = state.limit_store.ping().await;
    let pool = state.repo.pool_stats();
    let snapshot = state.snapshot.load();

    let healthy = database && rate_limit;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "store": { "database": database, "rate_limit": rate_limit },
        "pool": pool,
        "snapshot": {
            "generation": snapshot.generation,
            "routes": snapshot.route_count,
            "services": snapshot.matcher.service_count(),
            "plugins": snapshot.plugins.len(),
        },
    });
    (status, Json(body))
}

/// Ready once a snapshot has been published and the stores answer.
async fn ready(State(state): State<OpsState>) -> impl IntoResponse {
    let published = state.snapshot.is_ready();
    let database = state.repo.ping().await;
    let rate_limit = state.limit_store.ping().await;

    let ready = published && database && rate_limit;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "ready": ready,
        "snapshot_published": published,
        "store": { "database": database, "rate_limit": rate_limit },
    });
    (status, Json(body))
}
