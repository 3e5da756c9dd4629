use uuid::Uuid;

use crate::DomainResult;
use crate::filters::FeedFilter;
use crate::items::{ChangelogQuery, FeedItem, FeedList};
use crate::ports::BoxFuture;

pub trait FeedItemRepository: Send + Sync {
    /// Upserts by natural key (delegate items are always inserted) and
    /// returns the stored item with its id and store-managed timestamps.
    fn save(&self, item: &FeedItem) -> BoxFuture<'_, DomainResult<FeedItem>>;

    fn get_dao_item(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Option<FeedItem>>>;

    fn get_proposal_item(
        &self,
        proposal_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<FeedItem>>>;

    fn get_by_filters(&self, filters: &[FeedFilter]) -> BoxFuture<'_, DomainResult<FeedList>>;

    fn list_updated_since(
        &self,
        query: &ChangelogQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<FeedItem>>>;
}
