use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainResult;
use crate::cache::ReadThroughCache;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::subscribers::{SubscriberProvider, SubscriberRepository};
use crate::tasks::BackgroundTasks;
use crate::util::now_ms;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subscriber {
    pub id: Uuid,
    #[serde(default)]
    pub webhook_url: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Accepts an empty URL (no webhook) or an absolute http(s) URL.
pub fn validate_webhook_url(value: &str) -> DomainResult<()> {
    if value.is_empty() {
        return Ok(());
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| DomainError::Validation(format!("invalid webhook_url: {err}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(DomainError::Validation(
            "webhook_url must be an absolute http(s) url".to_string(),
        )),
    }
}

/// Subscriber registry. Like [`crate::subscriptions::SubscriptionService`],
/// the cache only sees writes made through the same instance.
#[derive(Clone)]
pub struct SubscriberService {
    repo: Arc<dyn SubscriberRepository>,
    cache: Option<ReadThroughCache<Uuid, Subscriber>>,
}

impl SubscriberService {
    pub fn new(repo: Arc<dyn SubscriberRepository>, tasks: BackgroundTasks) -> Self {
        Self {
            repo,
            cache: Some(ReadThroughCache::new(tasks)),
        }
    }

    pub fn uncached(repo: Arc<dyn SubscriberRepository>) -> Self {
        Self { repo, cache: None }
    }

    pub async fn create(&self, webhook_url: Option<String>) -> DomainResult<Subscriber> {
        let webhook_url = webhook_url.unwrap_or_default().trim().to_string();
        validate_webhook_url(&webhook_url)?;

        let id = self.unused_id().await?;
        let now = now_ms();
        let created = self
            .repo
            .create(&Subscriber {
                id,
                webhook_url,
                created_at_ms: now,
                updated_at_ms: now,
            })
            .await?;
        self.remember(created.clone());
        Ok(created)
    }

    pub async fn update_webhook(&self, id: Uuid, webhook_url: String) -> DomainResult<Subscriber> {
        let webhook_url = webhook_url.trim().to_string();
        validate_webhook_url(&webhook_url)?;

        let mut subscriber = self.get_by_id(id).await?;
        subscriber.webhook_url = webhook_url;
        subscriber.updated_at_ms = now_ms();
        let updated = self.repo.update(&subscriber).await?;
        self.remember(updated.clone());
        Ok(updated)
    }

    /// Cached lookup; a miss reads the store and populates in the background.
    pub async fn get_by_id(&self, id: Uuid) -> DomainResult<Subscriber> {
        let Some(cache) = &self.cache else {
            return self.repo.get(id).await?.ok_or(DomainError::NotFound);
        };
        if let Some(hit) = cache.get(&id) {
            return Ok(hit);
        }

        let generation = cache.generation();
        let subscriber = self.repo.get(id).await?.ok_or(DomainError::NotFound)?;
        cache.populate(generation, id, subscriber.clone());
        Ok(subscriber)
    }

    async fn unused_id(&self) -> DomainResult<Uuid> {
        loop {
            let candidate = Uuid::new_v4();
            if self.repo.get(candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
    }

    fn remember(&self, subscriber: Subscriber) {
        if let Some(cache) = &self.cache {
            cache.insert(subscriber.id, subscriber);
        }
    }
}

impl SubscriberProvider for SubscriberService {
    fn get_subscriber(&self, id: Uuid) -> BoxFuture<'_, DomainResult<Subscriber>> {
        Box::pin(async move { self.get_by_id(id).await })
    }
}
