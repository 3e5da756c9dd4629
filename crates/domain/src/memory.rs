//! In-memory stores backing `data_backend = memory` and the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::DomainResult;
use crate::error::DomainError;
use crate::filters::{FeedFilter, apply_filters};
use crate::items::{ChangelogQuery, FeedItem, FeedItemKey, FeedItemType, FeedList};
use crate::ports::BoxFuture;
use crate::ports::bus::{BusError, EventPublisher};
use crate::ports::feed::FeedItemRepository;
use crate::ports::subscribers::{SubscriberRepository, SubscriptionRepository};
use crate::subscribers::Subscriber;
use crate::subscriptions::Subscription;
use crate::util::now_ms;

#[derive(Default)]
struct FeedStore {
    items: HashMap<Uuid, FeedItem>,
    by_key: HashMap<FeedItemKey, Uuid>,
    last_write_ms: i64,
}

impl FeedStore {
    /// Store clock: wall clock, forced strictly increasing so every write gets
    /// a distinct `updated_at_ms`.
    fn tick(&mut self) -> i64 {
        self.last_write_ms = now_ms().max(self.last_write_ms + 1);
        self.last_write_ms
    }
}

#[derive(Default)]
pub struct InMemoryFeedItemRepository {
    store: Arc<RwLock<FeedStore>>,
}

impl InMemoryFeedItemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeedItemRepository for InMemoryFeedItemRepository {
    fn save(&self, item: &FeedItem) -> BoxFuture<'_, DomainResult<FeedItem>> {
        let mut item = item.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let now = store.tick();
            let key = item.natural_key();

            let existing = key
                .as_ref()
                .and_then(|key| store.by_key.get(key).copied())
                .and_then(|id| store.items.get(&id).cloned());
            match existing {
                Some(existing) => {
                    item.id = existing.id;
                    item.created_at_ms = existing.created_at_ms;
                }
                None => {
                    item.id = Some(Uuid::now_v7());
                    item.created_at_ms = now;
                }
            }
            item.updated_at_ms = now;

            let id = item
                .id
                .ok_or_else(|| DomainError::Storage("missing item id".to_string()))?;
            if let Some(key) = key {
                store.by_key.insert(key, id);
            }
            store.items.insert(id, item.clone());
            Ok(item)
        })
    }

    fn get_dao_item(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Option<FeedItem>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let key = FeedItemKey {
                dao_id,
                proposal_id: String::new(),
                item_type: FeedItemType::Dao,
            };
            Ok(store
                .by_key
                .get(&key)
                .and_then(|id| store.items.get(id))
                .cloned())
        })
    }

    fn get_proposal_item(
        &self,
        proposal_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<FeedItem>>> {
        let proposal_id = proposal_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            Ok(store
                .items
                .values()
                .find(|item| {
                    item.item_type == FeedItemType::Proposal && item.proposal_id == proposal_id
                })
                .cloned())
        })
    }

    fn get_by_filters(&self, filters: &[FeedFilter]) -> BoxFuture<'_, DomainResult<FeedList>> {
        let filters = filters.to_vec();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let items = store.items.values().cloned().collect();
            Ok(apply_filters(items, &filters, now_ms()))
        })
    }

    fn list_updated_since(
        &self,
        query: &ChangelogQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<FeedItem>>> {
        let query = query.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let mut items: Vec<FeedItem> = store
                .items
                .values()
                .filter(|item| {
                    item.updated_at_ms > query.updated_after_ms
                        && query.dao_ids.contains(&item.dao_id)
                        && (query.types.is_empty() || query.types.contains(&item.item_type))
                })
                .cloned()
                .collect();
            items.sort_by_key(|item| item.updated_at_ms);
            items.truncate(query.limit);
            Ok(items)
        })
    }
}

#[derive(Default)]
pub struct InMemorySubscriberRepository {
    store: Arc<RwLock<HashMap<Uuid, Subscriber>>>,
}

impl InMemorySubscriberRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriberRepository for InMemorySubscriberRepository {
    fn create(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>> {
        let subscriber = subscriber.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.contains_key(&subscriber.id) {
                return Err(DomainError::Conflict);
            }
            store.insert(subscriber.id, subscriber.clone());
            Ok(subscriber)
        })
    }

    fn update(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>> {
        let subscriber = subscriber.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let Some(existing) = store.get_mut(&subscriber.id) else {
                return Err(DomainError::NotFound);
            };
            *existing = subscriber.clone();
            Ok(subscriber)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, DomainResult<Option<Subscriber>>> {
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&id).cloned()) })
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    store: Arc<RwLock<HashMap<(Uuid, Uuid), Subscription>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionRepository for InMemorySubscriptionRepository {
    fn create(&self, subscription: &Subscription) -> BoxFuture<'_, DomainResult<Subscription>> {
        let subscription = subscription.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let key = (subscription.subscriber_id, subscription.dao_id);
            if store.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            store.insert(key, subscription.clone());
            Ok(subscription)
        })
    }

    fn delete(&self, subscriber_id: Uuid, dao_id: Uuid) -> BoxFuture<'_, DomainResult<()>> {
        let store = self.store.clone();
        Box::pin(async move {
            match store.write().await.remove(&(subscriber_id, dao_id)) {
                Some(_) => Ok(()),
                None => Err(DomainError::NotFound),
            }
        })
    }

    fn get(
        &self,
        subscriber_id: Uuid,
        dao_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Option<Subscription>>> {
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&(subscriber_id, dao_id)).cloned()) })
    }

    fn list_by_dao(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Subscription>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let mut subscriptions: Vec<Subscription> = store
                .values()
                .filter(|subscription| subscription.dao_id == dao_id)
                .cloned()
                .collect();
            subscriptions.sort_by_key(|subscription| subscription.created_at_ms);
            Ok(subscriptions)
        })
    }

    fn list_by_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Vec<Subscription>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            let mut subscriptions: Vec<Subscription> = store
                .values()
                .filter(|subscription| subscription.subscriber_id == subscriber_id)
                .cloned()
                .collect();
            subscriptions.sort_by_key(|subscription| subscription.created_at_ms);
            Ok(subscriptions)
        })
    }
}

/// Publisher that keeps every message in memory, in publish order.
#[derive(Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<(String, serde_json::Value)>>>,
    failing_subjects: Vec<String>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every publish on `subject`.
    pub fn failing_on(mut self, subject: &str) -> Self {
        self.failing_subjects.push(subject.to_string());
        self
    }

    pub async fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.read().await.clone()
    }

    pub async fn published_on(&self, subject: &str) -> Vec<serde_json::Value> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(published_subject, _)| published_subject == subject)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish_json(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> BoxFuture<'_, Result<(), BusError>> {
        let subject = subject.to_string();
        let payload = payload.clone();
        Box::pin(async move {
            if self.failing_subjects.contains(&subject) {
                return Err(BusError::Unavailable(format!("publish to {subject} rejected")));
            }
            self.published.write().await.push((subject, payload));
            Ok(())
        })
    }
}
