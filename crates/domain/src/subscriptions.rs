use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainResult;
use crate::cache::ReadThroughCache;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::subscribers::{SubscriptionProvider, SubscriptionRepository};
use crate::tasks::BackgroundTasks;
use crate::util::now_ms;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub dao_id: Uuid,
    pub created_at_ms: i64,
}

/// Subscription registry with an optional per-DAO read-through cache of
/// subscriber ids.
///
/// The cache only sees changes made through the same instance. A process that
/// reads the registry while another process writes it must use
/// [`SubscriptionService::uncached`].
#[derive(Clone)]
pub struct SubscriptionService {
    repo: Arc<dyn SubscriptionRepository>,
    by_dao: Option<ReadThroughCache<Uuid, Vec<Uuid>>>,
}

impl SubscriptionService {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, tasks: BackgroundTasks) -> Self {
        Self {
            repo,
            by_dao: Some(ReadThroughCache::new(tasks)),
        }
    }

    pub fn uncached(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo, by_dao: None }
    }

    /// Idempotent: an existing subscription is returned unchanged.
    pub async fn subscribe(&self, subscriber_id: Uuid, dao_id: Uuid) -> DomainResult<Subscription> {
        if let Some(existing) = self.repo.get(subscriber_id, dao_id).await? {
            return Ok(existing);
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            subscriber_id,
            dao_id,
            created_at_ms: now_ms(),
        };
        let created = match self.repo.create(&subscription).await {
            Ok(created) => created,
            Err(DomainError::Conflict) => self
                .repo
                .get(subscriber_id, dao_id)
                .await?
                .ok_or(DomainError::Conflict)?,
            Err(err) => return Err(err),
        };
        self.forget(dao_id);
        Ok(created)
    }

    pub async fn unsubscribe(&self, subscriber_id: Uuid, dao_id: Uuid) -> DomainResult<()> {
        self.repo.delete(subscriber_id, dao_id).await?;
        self.forget(dao_id);
        Ok(())
    }

    pub async fn subscribers_of(&self, dao_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let Some(by_dao) = &self.by_dao else {
            return self.load_subscribers_of(dao_id).await;
        };
        if let Some(hit) = by_dao.get(&dao_id) {
            return Ok(hit);
        }

        let generation = by_dao.generation();
        let subscriber_ids = self.load_subscribers_of(dao_id).await?;
        by_dao.populate(generation, dao_id, subscriber_ids.clone());
        Ok(subscriber_ids)
    }

    pub async fn daos_of(&self, subscriber_id: Uuid) -> DomainResult<Vec<Uuid>> {
        Ok(self
            .repo
            .list_by_subscriber(subscriber_id)
            .await?
            .into_iter()
            .map(|subscription| subscription.dao_id)
            .collect())
    }

    async fn load_subscribers_of(&self, dao_id: Uuid) -> DomainResult<Vec<Uuid>> {
        Ok(self
            .repo
            .list_by_dao(dao_id)
            .await?
            .into_iter()
            .map(|subscription| subscription.subscriber_id)
            .collect())
    }

    fn forget(&self, dao_id: Uuid) {
        if let Some(by_dao) = &self.by_dao {
            by_dao.remove(&dao_id);
        }
    }
}

impl SubscriptionProvider for SubscriptionService {
    fn subscribers_of(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Uuid>>> {
        Box::pin(async move { SubscriptionService::subscribers_of(self, dao_id).await })
    }

    fn daos_of(&self, subscriber_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Uuid>>> {
        Box::pin(async move { SubscriptionService::daos_of(self, subscriber_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySubscriptionRepository;

    fn service() -> SubscriptionService {
        SubscriptionService::new(
            Arc::new(InMemorySubscriptionRepository::new()),
            BackgroundTasks::spawn("subscriptions", 8),
        )
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let service = service();
        let (subscriber, dao) = (Uuid::new_v4(), Uuid::new_v4());

        let first = service.subscribe(subscriber, dao).await.expect("subscribe");
        let second = service.subscribe(subscriber, dao).await.expect("subscribe again");

        assert_eq!(first.id, second.id);
        assert_eq!(
            service.subscribers_of(dao).await.expect("subscribers"),
            vec![subscriber]
        );
    }

    #[tokio::test]
    async fn unsubscribe_missing_is_not_found() {
        let service = service();
        let err = service
            .unsubscribe(Uuid::new_v4(), Uuid::new_v4())
            .await
            .expect_err("missing");
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn cached_subscribers_refresh_after_changes() {
        let service = service();
        let dao = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let by_dao = service.by_dao.clone().expect("cached service");

        service.subscribe(alice, dao).await.expect("subscribe alice");
        assert_eq!(service.subscribers_of(dao).await.expect("first read"), vec![alice]);
        by_dao.flush().await;

        service.subscribe(bob, dao).await.expect("subscribe bob");
        let mut subscribers = service.subscribers_of(dao).await.expect("second read");
        subscribers.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(subscribers, expected);

        service.unsubscribe(alice, dao).await.expect("unsubscribe");
        by_dao.flush().await;
        assert_eq!(service.subscribers_of(dao).await.expect("third read"), vec![bob]);
        assert_eq!(service.daos_of(bob).await.expect("daos"), vec![dao]);
    }

    #[tokio::test]
    async fn uncached_reader_sees_writes_from_another_instance() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let writer = SubscriptionService::new(repo.clone(), BackgroundTasks::spawn("writer", 8));
        let reader = SubscriptionService::uncached(repo);
        let (subscriber, dao) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(reader.subscribers_of(dao).await.expect("empty read").is_empty());

        writer.subscribe(subscriber, dao).await.expect("subscribe");
        assert_eq!(reader.subscribers_of(dao).await.expect("read"), vec![subscriber]);

        writer.unsubscribe(subscriber, dao).await.expect("unsubscribe");
        assert!(reader.subscribers_of(dao).await.expect("read").is_empty());
    }
}
