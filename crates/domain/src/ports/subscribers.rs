use uuid::Uuid;

use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::subscribers::Subscriber;
use crate::subscriptions::Subscription;

pub trait SubscriberRepository: Send + Sync {
    fn create(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>>;

    fn update(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>>;

    fn get(&self, id: Uuid) -> BoxFuture<'_, DomainResult<Option<Subscriber>>>;
}

pub trait SubscriptionRepository: Send + Sync {
    /// Fails with `Conflict` when the pair already exists.
    fn create(&self, subscription: &Subscription) -> BoxFuture<'_, DomainResult<Subscription>>;

    /// Fails with `NotFound` when the pair does not exist.
    fn delete(&self, subscriber_id: Uuid, dao_id: Uuid) -> BoxFuture<'_, DomainResult<()>>;

    fn get(
        &self,
        subscriber_id: Uuid,
        dao_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Option<Subscription>>>;

    fn list_by_dao(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Subscription>>>;

    fn list_by_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Vec<Subscription>>>;
}

/// Subscriber lookup used during fan-out.
pub trait SubscriberProvider: Send + Sync {
    fn get_subscriber(&self, id: Uuid) -> BoxFuture<'_, DomainResult<Subscriber>>;
}

/// Subscription lookups used during fan-out and by the changelog stream.
pub trait SubscriptionProvider: Send + Sync {
    fn subscribers_of(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Uuid>>>;

    fn daos_of(&self, subscriber_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Uuid>>>;
}
