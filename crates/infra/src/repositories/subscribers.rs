use std::sync::Arc;

use govfeed_domain::DomainResult;
use govfeed_domain::error::DomainError;
use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::subscribers::{SubscriberRepository, SubscriptionRepository};
use govfeed_domain::subscribers::Subscriber;
use govfeed_domain::subscriptions::Subscription;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use uuid::Uuid;

use super::{decode_rows, map_surreal_error, parse_uuid};

const SUBSCRIBER_FIELDS: &str = "subscriber_id, webhook_url, created_at_ms, updated_at_ms";
const SUBSCRIPTION_FIELDS: &str = "subscription_id, subscriber_id, dao_id, created_at_ms";

#[derive(Debug, Deserialize)]
struct SubscriberRow {
    subscriber_id: String,
    #[serde(default)]
    webhook_url: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl SubscriberRow {
    fn into_subscriber(self) -> DomainResult<Subscriber> {
        Ok(Subscriber {
            id: parse_uuid(&self.subscriber_id, "subscriber id")?,
            webhook_url: self.webhook_url,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

fn decode_subscribers(rows: Vec<Value>) -> DomainResult<Vec<Subscriber>> {
    decode_rows::<SubscriberRow>(rows, "subscriber")?
        .into_iter()
        .map(SubscriberRow::into_subscriber)
        .collect()
}

#[derive(Clone)]
pub struct SurrealSubscriberRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealSubscriberRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl SubscriberRepository for SurrealSubscriberRepository {
    fn create(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>> {
        let subscriber = subscriber.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "CREATE type::thing('subscriber', $subscriber_id) SET \
                        subscriber_id = $subscriber_id, \
                        webhook_url = $webhook_url, \
                        created_at_ms = $created_at_ms, \
                        updated_at_ms = $updated_at_ms \
                     RETURN {SUBSCRIBER_FIELDS};"
                ))
                .bind(("subscriber_id", subscriber.id.to_string()))
                .bind(("webhook_url", subscriber.webhook_url.clone()))
                .bind(("created_at_ms", subscriber.created_at_ms))
                .bind(("updated_at_ms", subscriber.updated_at_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_subscribers(rows)?
                .pop()
                .ok_or_else(|| DomainError::Storage("create returned no row".to_string()))
        })
    }

    fn update(&self, subscriber: &Subscriber) -> BoxFuture<'_, DomainResult<Subscriber>> {
        let subscriber = subscriber.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "UPDATE type::thing('subscriber', $subscriber_id) SET \
                        webhook_url = $webhook_url, \
                        updated_at_ms = $updated_at_ms \
                     RETURN {SUBSCRIBER_FIELDS};"
                ))
                .bind(("subscriber_id", subscriber.id.to_string()))
                .bind(("webhook_url", subscriber.webhook_url.clone()))
                .bind(("updated_at_ms", subscriber.updated_at_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_subscribers(rows)?.pop().ok_or(DomainError::NotFound)
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, DomainResult<Option<Subscriber>>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {SUBSCRIBER_FIELDS} FROM type::thing('subscriber', $subscriber_id);"
                ))
                .bind(("subscriber_id", id.to_string()))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            Ok(decode_subscribers(rows)?.pop())
        })
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionRow {
    subscription_id: String,
    subscriber_id: String,
    dao_id: String,
    created_at_ms: i64,
}

impl SubscriptionRow {
    fn into_subscription(self) -> DomainResult<Subscription> {
        Ok(Subscription {
            id: parse_uuid(&self.subscription_id, "subscription id")?,
            subscriber_id: parse_uuid(&self.subscriber_id, "subscriber id")?,
            dao_id: parse_uuid(&self.dao_id, "dao id")?,
            created_at_ms: self.created_at_ms,
        })
    }
}

fn decode_subscriptions(rows: Vec<Value>) -> DomainResult<Vec<Subscription>> {
    decode_rows::<SubscriptionRow>(rows, "subscription")?
        .into_iter()
        .map(SubscriptionRow::into_subscription)
        .collect()
}

/// Subscriptions live at `subscription:[subscriber_id, dao_id]`, so the pair
/// is unique by record id.
#[derive(Clone)]
pub struct SurrealSubscriptionRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealSubscriptionRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    async fn list_where(&self, field: &'static str, id: Uuid) -> DomainResult<Vec<Subscription>> {
        let mut response = self
            .client
            .query(format!(
                "SELECT {SUBSCRIPTION_FIELDS} FROM subscription \
                 WHERE {field} = $id ORDER BY created_at_ms ASC;"
            ))
            .bind(("id", id.to_string()))
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        decode_subscriptions(rows)
    }
}

impl SubscriptionRepository for SurrealSubscriptionRepository {
    fn create(&self, subscription: &Subscription) -> BoxFuture<'_, DomainResult<Subscription>> {
        let subscription = subscription.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "CREATE type::thing('subscription', [$subscriber_id, $dao_id]) SET \
                        subscription_id = $subscription_id, \
                        subscriber_id = $subscriber_id, \
                        dao_id = $dao_id, \
                        created_at_ms = $created_at_ms \
                     RETURN {SUBSCRIPTION_FIELDS};"
                ))
                .bind(("subscription_id", subscription.id.to_string()))
                .bind(("subscriber_id", subscription.subscriber_id.to_string()))
                .bind(("dao_id", subscription.dao_id.to_string()))
                .bind(("created_at_ms", subscription.created_at_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_subscriptions(rows)?
                .pop()
                .ok_or_else(|| DomainError::Storage("create returned no row".to_string()))
        })
    }

    fn delete(&self, subscriber_id: Uuid, dao_id: Uuid) -> BoxFuture<'_, DomainResult<()>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("DELETE type::thing('subscription', [$subscriber_id, $dao_id]) RETURN BEFORE;")
                .bind(("subscriber_id", subscriber_id.to_string()))
                .bind(("dao_id", dao_id.to_string()))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            if rows.is_empty() {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }

    fn get(
        &self,
        subscriber_id: Uuid,
        dao_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Option<Subscription>>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {SUBSCRIPTION_FIELDS} \
                     FROM type::thing('subscription', [$subscriber_id, $dao_id]);"
                ))
                .bind(("subscriber_id", subscriber_id.to_string()))
                .bind(("dao_id", dao_id.to_string()))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            Ok(decode_subscriptions(rows)?.pop())
        })
    }

    fn list_by_dao(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Vec<Subscription>>> {
        Box::pin(self.list_where("dao_id", dao_id))
    }

    fn list_by_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> BoxFuture<'_, DomainResult<Vec<Subscription>>> {
        Box::pin(self.list_where("subscriber_id", subscriber_id))
    }
}
