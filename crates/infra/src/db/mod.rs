use std::sync::Arc;
use std::time::Duration;

use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::db::{DbAdapter, DbError};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

const SCHEMA: &str = "\
    DEFINE TABLE IF NOT EXISTS feed_item SCHEMALESS; \
    DEFINE INDEX IF NOT EXISTS feed_item_updated ON feed_item FIELDS updated_at_ms; \
    DEFINE INDEX IF NOT EXISTS feed_item_triggered ON feed_item FIELDS triggered_at_ms; \
    DEFINE INDEX IF NOT EXISTS feed_item_dao ON feed_item FIELDS dao_id, type; \
    DEFINE INDEX IF NOT EXISTS feed_item_proposal ON feed_item FIELDS proposal_id, type; \
    DEFINE TABLE IF NOT EXISTS subscriber SCHEMALESS; \
    DEFINE TABLE IF NOT EXISTS subscription SCHEMALESS; \
    DEFINE INDEX IF NOT EXISTS subscription_dao ON subscription FIELDS dao_id; \
    DEFINE INDEX IF NOT EXISTS subscription_subscriber ON subscription FIELDS subscriber_id;";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Opens a signed-in client on the configured namespace and database and
/// applies the table and index definitions.
pub async fn connect_surreal(config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&config.endpoint).await?;
    db.signin(Root {
        username: &config.username,
        password: &config.password,
    })
    .await?;
    db.use_ns(&config.namespace).use_db(&config.database).await?;
    db.query(SCHEMA).await?.check()?;
    tracing::info!(
        endpoint = %config.endpoint,
        namespace = %config.namespace,
        database = %config.database,
        "surreal connected"
    );
    Ok(Arc::new(db))
}

#[derive(Debug, Clone)]
pub struct SurrealAdapter {
    config: DbConfig,
}

impl SurrealAdapter {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl DbAdapter for SurrealAdapter {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            let address = socket_address(&endpoint)?;
            timeout(Duration::from_secs(2), TcpStream::connect(&address))
                .await
                .map_err(|_| DbError::Unavailable(format!("connect to {address} timed out")))?
                .map_err(|err| DbError::Unavailable(format!("connect to {address} failed: {err}")))?;
            tracing::debug!(%address, "surreal health check succeeded");
            Ok(())
        })
    }
}

fn socket_address(endpoint: &str) -> Result<String, DbError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| DbError::Unavailable(format!("invalid endpoint '{endpoint}': {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DbError::Unavailable(format!("endpoint '{endpoint}' has no host")))?;
    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "wss" | "https" => 443,
        _ => 8000,
    });
    Ok(format!("{host}:{port}"))
}
