use std::sync::Arc;

use govfeed_domain::memory::{
    InMemoryFeedItemRepository, InMemorySubscriberRepository, InMemorySubscriptionRepository,
};
use govfeed_domain::ports::db::{DbAdapter, InMemoryDbAdapter};
use govfeed_domain::ports::feed::FeedItemRepository;
use govfeed_domain::ports::subscribers::{SubscriberRepository, SubscriptionRepository};

use crate::config::AppConfig;
use crate::db::{DbConfig, SurrealAdapter, connect_surreal};
use crate::repositories::{
    SurrealFeedItemRepository, SurrealSubscriberRepository, SurrealSubscriptionRepository,
};

/// Repositories for the configured `data_backend`.
#[derive(Clone)]
pub struct Stores {
    pub feed_items: Arc<dyn FeedItemRepository>,
    pub subscribers: Arc<dyn SubscriberRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub db: Arc<dyn DbAdapter>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            feed_items: Arc::new(InMemoryFeedItemRepository::new()),
            subscribers: Arc::new(InMemorySubscriberRepository::new()),
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            db: Arc::new(InMemoryDbAdapter),
        }
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if !config.uses_surreal() {
            tracing::warn!(
                data_backend = %config.data_backend,
                "using in-memory stores; data is process-local"
            );
            return Ok(Self::in_memory());
        }
        let db_config = DbConfig::from_app_config(config);
        let client = connect_surreal(&db_config).await?;
        Ok(Self {
            feed_items: Arc::new(SurrealFeedItemRepository::with_client(client.clone())),
            subscribers: Arc::new(SurrealSubscriberRepository::with_client(client.clone())),
            subscriptions: Arc::new(SurrealSubscriptionRepository::with_client(client)),
            db: Arc::new(SurrealAdapter::new(db_config)),
        })
    }
}
