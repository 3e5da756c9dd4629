use std::time::Instant;

use govfeed_domain::events::{DelegatePayload, DelegateSubject};
use govfeed_domain::feed::{FeedService, HandleOutcome};
use govfeed_domain::ingest::build_delegate_item;
use govfeed_domain::items::FeedItemType;
use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::bus::{HandlerError, MessageHandler};
use govfeed_domain::util::now_ms;
use tracing::debug;

use super::{decode, observe};

pub(super) const FAMILY: &str = "item_delegate";

pub(super) fn subjects() -> Vec<&'static str> {
    DelegateSubject::ALL
        .iter()
        .map(DelegateSubject::as_str)
        .collect()
}

/// Delegate items are insert-only, so no per-key lock is taken.
pub struct DelegateHandler {
    feed: FeedService,
}

impl DelegateHandler {
    pub fn new(feed: FeedService) -> Self {
        Self { feed }
    }

    async fn apply(&self, subject: &str, payload: &[u8]) -> Result<HandleOutcome, HandlerError> {
        let (event, snapshot) = decode::<DelegatePayload>(payload)?;
        let built = build_delegate_item(subject, &event, snapshot, now_ms());
        let outcome = self
            .feed
            .handle_item(built.item, built.send_updates)
            .await?;
        debug!(
            subject,
            dao_id = %event.dao_id,
            proposal_id = %event.proposal_id,
            action = %outcome.item.action,
            "delegate event handled"
        );
        Ok(outcome)
    }
}

impl MessageHandler for DelegateHandler {
    fn handle<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.apply(subject, payload).await;
            observe(FeedItemType::Delegate.as_str(), started, &result);
            result.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::testing;
    use govfeed_domain::filters::FeedFilter;
    use govfeed_domain::ports::feed::FeedItemRepository;
    use govfeed_domain::timeline::TimelineAction;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn every_delegate_event_becomes_its_own_item() {
        let stack = testing::stack();
        let handler = DelegateHandler::new(stack.feed.clone());
        let payload = serde_json::to_vec(&json!({
            "dao_id": Uuid::new_v4(),
            "proposal_id": "0xdeleg",
            "initiator": "0xalice",
            "delegator": "0xbob",
            "due_date": "2030-01-01T00:00:00Z"
        }))
        .expect("encode");

        handler
            .handle("core.delegate.voting.voted", &payload)
            .await
            .expect("voted");
        handler
            .handle("core.delegate.voting.voted", &payload)
            .await
            .expect("voted again");

        let list = stack
            .repo
            .get_by_filters(&[FeedFilter::Types {
                types: vec![FeedItemType::Delegate],
            }])
            .await
            .expect("list");
        assert_eq!(list.total_count, 2);
        assert!(list
            .items
            .iter()
            .all(|item| item.action == TimelineAction::DelegateVotingVoted));
    }
}
