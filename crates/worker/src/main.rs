mod consumers;
mod observability;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use govfeed_domain::fanout::FanOut;
use govfeed_domain::feed::{FeedQueryService, FeedService};
use govfeed_domain::locks::KeyedLocks;
use govfeed_domain::ports::bus::ConsumerOptions;
use govfeed_domain::ports::db::DbAdapter;
use govfeed_domain::subscribers::SubscriberService;
use govfeed_domain::subscriptions::SubscriptionService;
use govfeed_infra::bus::{RedisBusConfig, RedisEventBus};
use govfeed_infra::change_signal::RedisChangeSignal;
use govfeed_infra::config::AppConfig;
use govfeed_infra::logging::init_tracing;
use govfeed_infra::stores::Stores;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "govfeed-worker")?;
    observability::init_metrics()?;

    let stores = Stores::from_config(&config).await?;
    let bus = RedisEventBus::connect(
        &config.redis_url,
        RedisBusConfig {
            stream_prefix: config.bus_stream_prefix.clone(),
            consumer_name: config.bus_consumer_name.clone(),
            block: config.bus_block(),
        },
    )
    .await?;
    let signal = RedisChangeSignal::connect(&config.redis_url, config.change_channel.clone()).await?;

    // Registry writes happen in the api processes; fan-out reads the store.
    let subscribers = SubscriberService::uncached(stores.subscribers.clone());
    let subscriptions = SubscriptionService::uncached(stores.subscriptions.clone());
    let fanout = FanOut::new(
        Arc::new(bus.clone()),
        Arc::new(subscribers),
        Arc::new(subscriptions),
        Arc::new(signal),
    );
    // Query results are cached by the api processes, not here.
    let queries = FeedQueryService::new(stores.feed_items.clone(), None);
    let feed = FeedService::new(stores.feed_items.clone(), queries, fanout);

    let families = consumers::families(feed, Arc::new(KeyedLocks::default()));
    let subscriptions = consumers::start(&bus, &families, |family| ConsumerOptions {
        group: config.consumer_group(family.name),
        max_ack_pending: config.bus_batch_size,
        ack_wait: config.bus_retry_interval(),
    })
    .await?;
    info!(subscriptions = subscriptions.len(), "worker consuming");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve_metrics(config.metrics_port, stores.db, shutdown_rx));

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    consumers::close_all(subscriptions).await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "metrics server exited"),
        Err(err) => error!(error = %err, "metrics server task failed"),
    }
    info!("worker shutdown");
    Ok(())
}

async fn serve_metrics(
    port: u16,
    db: Arc<dyn DbAdapter>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(db);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "worker metrics listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn metrics() -> (StatusCode, String) {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn health(State(db): State<Arc<dyn DbAdapter>>) -> (StatusCode, String) {
    match db.health_check().await {
        Ok(()) => (StatusCode::OK, format!("ok ({})", db.name())),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}
