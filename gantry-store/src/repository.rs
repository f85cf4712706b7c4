use gantry_core::config::DatabaseConfig;
use gantry_core::consumer::{ApiKey, Consumer};
use gantry_core::plugin_config::{PluginConfig, PluginScope};
use gantry_core::route::Route;
use gantry_core::service::{Scheme, Service};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{error, info};

/// Read-only access to the configuration store. The control plane owns
/// every write; the gateway only deserializes the record sets it needs.
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

/// Pool statistics reported by the health endpoint.
#[derive(Debug, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

impl Repository {
    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .connect(&cfg.url)
            .await?;
        info!(max_connections = cfg.max_connections, "Connected to configuration store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Liveness probe used by the health endpoints.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    /// Enabled services, hot reload path.
    pub async fn list_enabled_services(&self) -> Result<Vec<Service>, sqlx::Error> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "SELECT id, name, scheme, host, port, base_path, read_timeout_ms, enabled, \
                    created_at, updated_at \
             FROM services WHERE enabled = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Service::from).collect())
    }

    /// Enabled routes, hot reload path.
    pub async fn list_enabled_routes(&self) -> Result<Vec<Route>, sqlx::Error> {
        let rows: Vec<RouteRow> = sqlx::query_as(
            "SELECT id, service_id, paths, methods, hosts, strip_path, preserve_host, \
                    enabled, created_at, updated_at \
             FROM routes WHERE enabled = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Route::from).collect())
    }

    /// Enabled plugin configurations, hot reload path. Rows with an
    /// unknown scope are dropped with a recorded error.
    pub async fn list_enabled_plugins(&self) -> Result<Vec<PluginConfig>, sqlx::Error> {
        let rows: Vec<PluginRow> = sqlx::query_as(
            "SELECT id, name, scope, service_id, route_id, consumer_id, config, priority, \
                    enabled, created_at, updated_at \
             FROM plugins WHERE enabled = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match PluginConfig::try_from(row) {
                    Ok(config) => Some(config),
                    Err(scope) => {
                        error!(plugin_id = %id, scope = %scope, "Dropping plugin row with unknown scope");
                        None
                    }
                }
            })
            .collect())
    }

    /// Consumer lookup for adapter plugins; not on the reload path.
    pub async fn get_consumer(&self, id: &str) -> Result<Option<Consumer>, sqlx::Error> {
        let row: Option<ConsumerRow> = sqlx::query_as(
            "SELECT id, username, custom_id, created_at FROM consumers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Consumer::from))
    }

    /// API key lookup by digest; raw keys never reach the store.
    pub async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, sqlx::Error> {
        let row: Option<ApiKeyRow> = sqlx::query_as(
            "SELECT id, consumer_id, key_hash, expires_at FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ApiKey::from))
    }
}

// ── Row types ─────────────────────────────────────────────────

#[derive(FromRow)]
struct ServiceRow {
    id: String,
    name: Option<String>,
    scheme: String,
    host: String,
    port: i32,
    base_path: Option<String>,
    read_timeout_ms: i64,
    enabled: bool,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            name: row.name.unwrap_or_default(),
            scheme: match row.scheme.as_str() {
                "https" => Scheme::Https,
                _ => Scheme::Http,
            },
            host: row.host,
            port: row.port as u16,
            base_path: row.base_path,
            read_timeout_ms: row.read_timeout_ms.max(0) as u64,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RouteRow {
    id: String,
    service_id: String,
    paths: Vec<String>,
    methods: Vec<String>,
    hosts: Vec<String>,
    strip_path: bool,
    preserve_host: bool,
    enabled: bool,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Route {
            id: row.id,
            service_id: row.service_id,
            paths: row.paths,
            methods: row.methods,
            hosts: row.hosts,
            strip_path: row.strip_path,
            preserve_host: row.preserve_host,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PluginRow {
    id: String,
    name: String,
    scope: String,
    service_id: Option<String>,
    route_id: Option<String>,
    consumer_id: Option<String>,
    config: serde_json::Value,
    priority: i32,
    enabled: bool,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<PluginRow> for PluginConfig {
    type Error = String;

    fn try_from(row: PluginRow) -> Result<Self, Self::Error> {
        let scope = match row.scope.as_str() {
            "global" => PluginScope::Global,
            "service" => PluginScope::Service,
            "route" => PluginScope::Route,
            "consumer" => PluginScope::Consumer,
            other => return Err(other.to_string()),
        };
        Ok(PluginConfig {
            id: row.id,
            name: row.name,
            scope,
            service_id: row.service_id,
            route_id: row.route_id,
            consumer_id: row.consumer_id,
            config: row.config,
            priority: row.priority,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ConsumerRow {
    id: String,
    username: Option<String>,
    custom_id: Option<String>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ConsumerRow> for Consumer {
    fn from(row: ConsumerRow) -> Self {
        Consumer {
            id: row.id,
            username: row.username.unwrap_or_default(),
            custom_id: row.custom_id,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    id: String,
    consumer_id: String,
    key_hash: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            consumer_id: row.consumer_id,
            key_hash: row.key_hash,
            expires_at: row.expires_at,
        }
    }
}
