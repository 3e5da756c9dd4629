//! Bus consumers. Each family owns one durable group and one subscription
//! per subject; messages for the same item are serialized through
//! [`KeyedLocks`] so concurrent subjects cannot interleave a read-merge-write.

mod dao;
mod delegate;
mod proposal;

use std::sync::Arc;
use std::time::Instant;

use govfeed_domain::feed::{FeedService, HandleOutcome};
use govfeed_domain::locks::KeyedLocks;
use govfeed_domain::ports::bus::{
    BusError, BusSubscription, ConsumerOptions, EventSubscriber, HandlerError, MessageHandler,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

pub use dao::DaoHandler;
pub use delegate::DelegateHandler;
pub use proposal::ProposalHandler;

use crate::observability;

pub struct ConsumerFamily {
    pub name: &'static str,
    pub subjects: Vec<&'static str>,
    pub handler: Arc<dyn MessageHandler>,
}

pub fn families(feed: FeedService, locks: Arc<KeyedLocks>) -> Vec<ConsumerFamily> {
    vec![
        ConsumerFamily {
            name: dao::FAMILY,
            subjects: dao::subjects(),
            handler: Arc::new(DaoHandler::new(feed.clone(), locks.clone())),
        },
        ConsumerFamily {
            name: proposal::FAMILY,
            subjects: proposal::subjects(),
            handler: Arc::new(ProposalHandler::new(feed.clone(), locks)),
        },
        ConsumerFamily {
            name: delegate::FAMILY,
            subjects: delegate::subjects(),
            handler: Arc::new(DelegateHandler::new(feed)),
        },
    ]
}

/// Subscribes every subject of every family. If any subscription fails the
/// ones already started are closed before the error is returned.
pub async fn start(
    subscriber: &dyn EventSubscriber,
    families: &[ConsumerFamily],
    options_for: impl Fn(&ConsumerFamily) -> ConsumerOptions,
) -> Result<Vec<Box<dyn BusSubscription>>, BusError> {
    let mut started: Vec<Box<dyn BusSubscription>> = Vec::new();
    for family in families {
        let options = options_for(family);
        for subject in &family.subjects {
            match subscriber
                .subscribe(subject, &options, family.handler.clone())
                .await
            {
                Ok(subscription) => started.push(subscription),
                Err(err) => {
                    warn!(family = family.name, subject, error = %err, "subscribe failed");
                    close_all(started).await;
                    return Err(err);
                }
            }
        }
        info!(family = family.name, group = %options.group, "consumer family started");
    }
    Ok(started)
}

pub async fn close_all(subscriptions: Vec<Box<dyn BusSubscription>>) {
    for subscription in subscriptions {
        let subject = subscription.subject().to_string();
        if let Err(err) = subscription.close().await {
            warn!(subject, error = %err, "subscription close failed");
        }
    }
}

/// Decodes the typed payload and keeps the raw document as the snapshot.
fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<(T, serde_json::Value), HandlerError> {
    let snapshot: serde_json::Value =
        serde_json::from_slice(payload).map_err(|err| HandlerError::Decode(err.to_string()))?;
    let typed = serde_json::from_value(snapshot.clone())
        .map_err(|err| HandlerError::Decode(err.to_string()))?;
    Ok((typed, snapshot))
}

fn observe(
    item_type: &'static str,
    started: Instant,
    result: &Result<HandleOutcome, HandlerError>,
) {
    observability::record_handled(item_type, result.is_err(), started.elapsed());
    if let Ok(HandleOutcome {
        fanout: Some(report),
        ..
    }) = result
    {
        observability::record_fanout(report);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use govfeed_domain::fanout::FanOut;
    use govfeed_domain::feed::{FeedQueryService, FeedService};
    use govfeed_domain::memory::{
        InMemoryEventPublisher, InMemoryFeedItemRepository, InMemorySubscriberRepository,
        InMemorySubscriptionRepository,
    };
    use govfeed_domain::notifier::ChangeNotifier;
    use govfeed_domain::subscribers::SubscriberService;
    use govfeed_domain::subscriptions::SubscriptionService;

    /// Wired like the worker binary: registry reads go straight to the
    /// shared repositories and no query cache is kept.
    pub struct Stack {
        pub feed: FeedService,
        pub repo: Arc<InMemoryFeedItemRepository>,
        pub publisher: Arc<InMemoryEventPublisher>,
        pub subscriber_repo: Arc<InMemorySubscriberRepository>,
        pub subscription_repo: Arc<InMemorySubscriptionRepository>,
    }

    pub fn stack() -> Stack {
        let repo = Arc::new(InMemoryFeedItemRepository::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let subscriber_repo = Arc::new(InMemorySubscriberRepository::new());
        let subscription_repo = Arc::new(InMemorySubscriptionRepository::new());
        let fanout = FanOut::new(
            publisher.clone(),
            Arc::new(SubscriberService::uncached(subscriber_repo.clone())),
            Arc::new(SubscriptionService::uncached(subscription_repo.clone())),
            ChangeNotifier::new(16),
        );
        Stack {
            feed: FeedService::new(repo.clone(), FeedQueryService::new(repo.clone(), None), fanout),
            repo,
            publisher,
            subscriber_repo,
            subscription_repo,
        }
    }
}
