use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::events::{
    CallbackPayload, SUBJECT_CALLBACK, SUBJECT_TIMELINE_UPDATE, TimelineUpdatePayload,
};
use crate::items::FeedItem;
use crate::ports::bus::EventPublisher;
use crate::ports::signal::{ChangeSignal, FeedChange};
use crate::ports::subscribers::{SubscriberProvider, SubscriptionProvider};
use crate::projection::ExternalFeedPayload;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub callbacks_published: usize,
    pub callbacks_failed: usize,
    pub subscribers_skipped: usize,
}

/// Best-effort notification of a persisted change. Every failure is logged
/// and isolated; nothing here is retried.
#[derive(Clone)]
pub struct FanOut {
    publisher: Arc<dyn EventPublisher>,
    subscribers: Arc<dyn SubscriberProvider>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    signal: Arc<dyn ChangeSignal>,
}

impl FanOut {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        subscribers: Arc<dyn SubscriberProvider>,
        subscriptions: Arc<dyn SubscriptionProvider>,
        signal: Arc<dyn ChangeSignal>,
    ) -> Self {
        Self {
            publisher,
            subscribers,
            subscriptions,
            signal,
        }
    }

    pub async fn deliver(&self, item: &FeedItem) -> FanOutReport {
        let mut report = FanOutReport::default();

        self.signal
            .signal(&FeedChange::feed_events(item.dao_id, item.proposal_id.clone()))
            .await;

        self.publish_timeline_update(item).await;

        let subscriber_ids = match self.subscriptions.subscribers_of(item.dao_id).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(dao_id = %item.dao_id, error = %err, "failed to resolve subscribers");
                return report;
            }
        };
        if subscriber_ids.is_empty() {
            return report;
        }

        let body = match serde_json::to_value(ExternalFeedPayload::from(item)) {
            Ok(body) => body,
            Err(err) => {
                error!(dao_id = %item.dao_id, error = %err, "failed to serialize feed payload");
                return report;
            }
        };

        for subscriber_id in subscriber_ids {
            let subscriber = match self.subscribers.get_subscriber(subscriber_id).await {
                Ok(subscriber) => subscriber,
                Err(err) => {
                    warn!(%subscriber_id, error = %err, "subscriber lookup failed");
                    report.subscribers_skipped += 1;
                    continue;
                }
            };
            if subscriber.webhook_url.is_empty() {
                debug!(%subscriber_id, "subscriber has no webhook");
                report.subscribers_skipped += 1;
                continue;
            }

            let callback = CallbackPayload {
                webhook_url: subscriber.webhook_url,
                body: body.clone(),
            };
            let published = match serde_json::to_value(&callback) {
                Ok(payload) => self.publisher.publish_json(SUBJECT_CALLBACK, &payload).await,
                Err(err) => {
                    error!(%subscriber_id, error = %err, "failed to serialize callback");
                    report.callbacks_failed += 1;
                    continue;
                }
            };
            match published {
                Ok(()) => report.callbacks_published += 1,
                Err(err) => {
                    error!(%subscriber_id, error = %err, "failed to publish callback");
                    report.callbacks_failed += 1;
                }
            }
        }

        report
    }

    /// Cache invalidation for a save that notifies nobody.
    pub async fn signal_saved(&self, item: &FeedItem) {
        self.signal
            .signal(&FeedChange::saved(item.dao_id, item.proposal_id.clone()))
            .await;
    }

    async fn publish_timeline_update(&self, item: &FeedItem) {
        let payload = TimelineUpdatePayload {
            dao_id: item.dao_id,
            proposal_id: item.proposal_id.clone(),
            discussion_id: item.discussion_id.clone(),
            timeline: item.timeline.entries().to_vec(),
        };
        let result = match serde_json::to_value(&payload) {
            Ok(value) => self.publisher.publish_json(SUBJECT_TIMELINE_UPDATE, &value).await,
            Err(err) => {
                error!(dao_id = %item.dao_id, error = %err, "failed to serialize timeline update");
                return;
            }
        };
        if let Err(err) = result {
            error!(dao_id = %item.dao_id, error = %err, "failed to publish timeline update");
        }
    }
}
