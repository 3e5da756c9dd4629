use std::sync::Arc;

use govfeed_domain::cache::FeedQueryCache;
use govfeed_domain::changelog::{ChangelogConfig, ChangelogService};
use govfeed_domain::feed::FeedQueryService;
use govfeed_domain::notifier::ChangeNotifier;
use govfeed_domain::ports::db::DbAdapter;
use govfeed_domain::subscribers::SubscriberService;
use govfeed_domain::subscriptions::SubscriptionService;
use govfeed_domain::tasks::BackgroundTasks;
use govfeed_infra::config::AppConfig;
use govfeed_infra::stores::Stores;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<dyn DbAdapter>,
    pub queries: FeedQueryService,
    pub changelog: ChangelogService,
    pub subscribers: SubscriberService,
    pub subscriptions: SubscriptionService,
    pub notifier: Arc<ChangeNotifier>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let stores = Stores::from_config(&config).await?;
        Ok(Self::with_stores(config, stores))
    }

    pub fn with_stores(config: AppConfig, stores: Stores) -> Self {
        let tasks = BackgroundTasks::spawn("cache-population", config.cache_population_queue);
        let cache = config
            .query_cache_enabled
            .then(|| FeedQueryCache::new(tasks.clone()));
        let queries = FeedQueryService::new(stores.feed_items.clone(), cache);
        let subscribers = SubscriberService::new(stores.subscribers.clone(), tasks.clone());
        let subscriptions = SubscriptionService::new(stores.subscriptions.clone(), tasks);
        let notifier = ChangeNotifier::new(config.notifier_buffer);
        let changelog = ChangelogService::new(
            stores.feed_items.clone(),
            Arc::new(subscriptions.clone()),
            notifier.clone(),
            ChangelogConfig {
                page_limit: config.watch_page_limit,
                forced_refresh: config.watch_forced_refresh(),
            },
        );

        Self {
            config,
            db: stores.db,
            queries,
            changelog,
            subscribers,
            subscriptions,
            notifier,
        }
    }
}
