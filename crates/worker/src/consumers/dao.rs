use std::sync::Arc;
use std::time::Instant;

use govfeed_domain::events::{DaoPayload, DaoSubject};
use govfeed_domain::feed::{FeedService, HandleOutcome};
use govfeed_domain::ingest::merge_dao_event;
use govfeed_domain::items::FeedItemType;
use govfeed_domain::locks::KeyedLocks;
use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::bus::{HandlerError, MessageHandler};
use govfeed_domain::util::now_ms;
use tracing::debug;

use super::{decode, observe};

pub(super) const FAMILY: &str = "item_dao";

pub(super) fn subjects() -> Vec<&'static str> {
    DaoSubject::ALL.iter().map(DaoSubject::as_str).collect()
}

pub struct DaoHandler {
    feed: FeedService,
    locks: Arc<KeyedLocks>,
}

impl DaoHandler {
    pub fn new(feed: FeedService, locks: Arc<KeyedLocks>) -> Self {
        Self { feed, locks }
    }

    async fn apply(&self, subject: &str, payload: &[u8]) -> Result<HandleOutcome, HandlerError> {
        let (event, snapshot) = decode::<DaoPayload>(payload)?;
        let _guard = self.locks.lock(&(FeedItemType::Dao, event.id)).await;

        let existing = self.feed.get_dao_item(event.id).await?;
        let merged = merge_dao_event(existing, subject, &event, snapshot, now_ms());
        let outcome = self
            .feed
            .handle_item(merged.item, merged.send_updates)
            .await?;
        debug!(
            subject,
            dao_id = %event.id,
            action = %outcome.item.action,
            fanned_out = outcome.fanout.is_some(),
            "dao event handled"
        );
        Ok(outcome)
    }
}

impl MessageHandler for DaoHandler {
    fn handle<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.apply(subject, payload).await;
            observe(FeedItemType::Dao.as_str(), started, &result);
            result.map(|_| ())
        })
    }
}
