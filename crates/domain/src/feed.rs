use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::DomainResult;
use crate::cache::FeedQueryCache;
use crate::fanout::{FanOut, FanOutReport};
use crate::filters::{FeedFilter, cache_key};
use crate::items::{FeedItem, FeedList};
use crate::ports::feed::FeedItemRepository;

/// Feed-by-filter reads with an optional read-through cache.
#[derive(Clone)]
pub struct FeedQueryService {
    repo: Arc<dyn FeedItemRepository>,
    cache: Option<FeedQueryCache>,
}

impl FeedQueryService {
    pub fn new(repo: Arc<dyn FeedItemRepository>, cache: Option<FeedQueryCache>) -> Self {
        Self { repo, cache }
    }

    pub async fn get_by_filters(&self, filters: &[FeedFilter]) -> DomainResult<FeedList> {
        let Some(cache) = &self.cache else {
            return self.repo.get_by_filters(filters).await;
        };

        let key = cache_key(filters);
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }

        let generation = cache.generation();
        let list = self.repo.get_by_filters(filters).await?;
        cache.populate(generation, key, list.clone());
        Ok(list)
    }

    pub fn invalidate(&self, dao_id: Uuid, proposal_id: &str) {
        if let Some(cache) = &self.cache {
            let dropped = cache.invalidate(dao_id, proposal_id);
            if dropped > 0 {
                debug!(%dao_id, proposal_id, dropped, "feed cache entries invalidated");
            }
        }
    }

    pub fn cache(&self) -> Option<&FeedQueryCache> {
        self.cache.as_ref()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandleOutcome {
    pub item: FeedItem,
    /// `None` when fan-out was suppressed.
    pub fanout: Option<FanOutReport>,
}

/// Persists merged items and fans out genuinely new facts.
#[derive(Clone)]
pub struct FeedService {
    repo: Arc<dyn FeedItemRepository>,
    queries: FeedQueryService,
    fanout: FanOut,
}

impl FeedService {
    pub fn new(repo: Arc<dyn FeedItemRepository>, queries: FeedQueryService, fanout: FanOut) -> Self {
        Self {
            repo,
            queries,
            fanout,
        }
    }

    pub async fn get_dao_item(&self, dao_id: Uuid) -> DomainResult<Option<FeedItem>> {
        self.repo.get_dao_item(dao_id).await
    }

    pub async fn get_proposal_item(&self, proposal_id: &str) -> DomainResult<Option<FeedItem>> {
        self.repo.get_proposal_item(proposal_id).await
    }

    /// Store failures are returned so the bus redelivers; fan-out failures
    /// never are.
    pub async fn handle_item(&self, mut item: FeedItem, send_updates: bool) -> DomainResult<HandleOutcome> {
        item.refresh_derived();

        let saved = self.repo.save(&item).await;
        self.queries.invalidate(item.dao_id, &item.proposal_id);
        let saved = saved?;

        if !send_updates {
            self.fanout.signal_saved(&saved).await;
            debug!(
                dao_id = %saved.dao_id,
                proposal_id = %saved.proposal_id,
                item_type = saved.item_type.as_str(),
                "duplicate milestone, fan-out skipped"
            );
            return Ok(HandleOutcome {
                item: saved,
                fanout: None,
            });
        }

        let report = self.fanout.deliver(&saved).await;
        Ok(HandleOutcome {
            item: saved,
            fanout: Some(report),
        })
    }
}
