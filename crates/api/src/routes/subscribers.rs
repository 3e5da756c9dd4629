use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use govfeed_domain::subscribers::Subscriber;
use govfeed_domain::subscriptions::Subscription;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::SubscriberContext;
use crate::state::AppState;
use crate::validation;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateSubscriberRequest {
    #[validate(length(max = 2048))]
    webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSubscriberResponse {
    subscriber_id: Uuid,
}

pub async fn create_subscriber(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriberRequest>,
) -> Result<(StatusCode, Json<CreateSubscriberResponse>), ApiError> {
    validation::validate(&payload)?;
    let subscriber = state.subscribers.create(payload.webhook_url).await?;
    info!(subscriber = %subscriber.id, "subscriber created");
    Ok((
        StatusCode::CREATED,
        Json(CreateSubscriberResponse {
            subscriber_id: subscriber.id,
        }),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateWebhookRequest {
    #[validate(length(max = 2048))]
    webhook_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriberResponse {
    subscriber_id: Uuid,
    webhook_url: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl From<Subscriber> for SubscriberResponse {
    fn from(subscriber: Subscriber) -> Self {
        Self {
            subscriber_id: subscriber.id,
            webhook_url: subscriber.webhook_url,
            created_at_ms: subscriber.created_at_ms,
            updated_at_ms: subscriber.updated_at_ms,
        }
    }
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(SubscriberContext(subscriber_id)): Extension<SubscriberContext>,
    Json(payload): Json<UpdateWebhookRequest>,
) -> Result<Json<SubscriberResponse>, ApiError> {
    validation::validate(&payload)?;
    let updated = state
        .subscribers
        .update_webhook(subscriber_id, payload.webhook_url)
        .await?;
    Ok(Json(updated.into()))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    dao_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    subscription_id: Uuid,
    subscriber_id: Uuid,
    dao_id: Uuid,
    created_at_ms: i64,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            subscription_id: subscription.id,
            subscriber_id: subscription.subscriber_id,
            dao_id: subscription.dao_id,
            created_at_ms: subscription.created_at_ms,
        }
    }
}

/// Idempotent: subscribing twice returns the existing subscription.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(SubscriberContext(subscriber_id)): Extension<SubscriberContext>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state
        .subscriptions
        .subscribe(subscriber_id, payload.dao_id)
        .await?;
    Ok(Json(subscription.into()))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(SubscriberContext(subscriber_id)): Extension<SubscriberContext>,
    Path(dao_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dao_id = Uuid::parse_str(&dao_id)
        .map_err(|_| ApiError::Validation(format!("dao_id is not a uuid: {dao_id}")))?;
    state.subscriptions.unsubscribe(subscriber_id, dao_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
