//! Cross-process "feed changed" signal over Redis pub/sub.
//!
//! The worker publishes a [`FeedChange`] per saved item; every api
//! process listens on the same channel, drops affected query-cache entries
//! and wakes its in-process watch sessions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use govfeed_domain::feed::FeedQueryService;
use govfeed_domain::notifier::ChangeNotifier;
use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::bus::BusError;
use govfeed_domain::ports::signal::{ChangeSignal, FeedChange};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct RedisChangeSignal {
    manager: ConnectionManager,
    channel: String,
}

impl RedisChangeSignal {
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self, BusError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| BusError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| BusError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            channel: channel.into(),
        })
    }
}

impl ChangeSignal for RedisChangeSignal {
    fn signal(&self, change: &FeedChange) -> BoxFuture<'_, ()> {
        let message = serde_json::to_string(change);
        Box::pin(async move {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "change signal not serializable");
                    return;
                }
            };
            let mut conn = self.manager.clone();
            let published: redis::RedisResult<i64> = conn.publish(&self.channel, message).await;
            match published {
                Ok(receivers) => debug!(channel = %self.channel, receivers, "change signalled"),
                Err(err) => warn!(channel = %self.channel, error = %err, "change signal failed"),
            }
        })
    }
}

/// Applies one received change: cache entries touching the item go first so
/// woken sessions and later queries read fresh data. Cache-only changes wake
/// nobody.
pub fn apply_change(change: &FeedChange, notifier: &ChangeNotifier, queries: &FeedQueryService) {
    queries.invalidate(change.dao_id, &change.proposal_id);
    let woken = if change.wakes_watchers() {
        notifier.publish_no_wait(change.clone())
    } else {
        0
    };
    debug!(
        key = %change.key,
        dao_id = %change.dao_id,
        proposal_id = %change.proposal_id,
        woken,
        "feed change applied"
    );
}

/// Listens on `channel` until `shutdown` flips, reconnecting after failures.
pub fn spawn_change_listener(
    redis_url: String,
    channel: String,
    notifier: Arc<ChangeNotifier>,
    queries: FeedQueryService,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let listened = tokio::select! {
                _ = shutdown.changed() => break,
                listened = listen(&redis_url, &channel, &notifier, &queries) => listened,
            };
            if let Err(err) = listened {
                warn!(channel = %channel, error = %err, "change listener disconnected");
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        info!(channel = %channel, "change listener stopped");
    })
}

async fn listen(
    redis_url: &str,
    channel: &str,
    notifier: &ChangeNotifier,
    queries: &FeedQueryService,
) -> redis::RedisResult<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel, "change listener subscribed");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel, error = %err, "unreadable change message");
                continue;
            }
        };
        match serde_json::from_str::<FeedChange>(&payload) {
            Ok(change) => apply_change(&change, notifier, queries),
            Err(err) => warn!(channel, error = %err, "malformed change message"),
        }
    }
    Ok(())
}
