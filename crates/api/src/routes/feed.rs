use std::convert::Infallible;
use std::ops::ControlFlow;
use std::time::Duration;

use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use govfeed_domain::changelog::{WatchRequest, convert_feed_event};
use govfeed_domain::filters::{FeedFilter, SortDirection};
use govfeed_domain::items::{FeedItem, FeedItemType};
use govfeed_domain::timeline::{TimelineAction, TimelineEntry};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::SubscriberContext;
use crate::observability;
use crate::state::AppState;
use crate::validation::{self, parse_list};

const DEFAULT_LIMIT: usize = 50;
const STREAM_BUFFER: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize, Validate)]
pub struct FeedQuery {
    dao_ids: Option<String>,
    types: Option<String>,
    actions: Option<String>,
    is_active: Option<bool>,
    #[validate(range(min = 1, max = 1000))]
    limit: Option<usize>,
    #[validate(range(max = 100_000))]
    offset: Option<usize>,
}

impl FeedQuery {
    /// Client predicates first, then the fixed exclusions, ordering and page.
    fn filters(&self) -> Result<Vec<FeedFilter>, ApiError> {
        let mut filters = Vec::new();

        let ids: Vec<Uuid> = parse_list("dao_ids", self.dao_ids.as_deref())?;
        if !ids.is_empty() {
            filters.push(FeedFilter::DaoIds { ids });
        }
        let types: Vec<FeedItemType> = parse_list("types", self.types.as_deref())?;
        if !types.is_empty() {
            filters.push(FeedFilter::Types { types });
        }
        let actions: Vec<TimelineAction> = self
            .actions
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|action| !action.is_empty())
            .map(TimelineAction::parse)
            .collect();
        if !actions.is_empty() {
            filters.push(FeedFilter::Actions { actions });
        }
        if let Some(is_active) = self.is_active {
            filters.push(FeedFilter::Active { is_active });
        }

        filters.extend([
            FeedFilter::SkipSpammed,
            FeedFilter::SkipCanceled,
            FeedFilter::SkipDelegates,
            FeedFilter::OrderByCreated {
                direction: SortDirection::Desc,
            },
            FeedFilter::Page {
                offset: self.offset.unwrap_or(0),
                limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            },
        ]);
        Ok(filters)
    }
}

/// Feed item as returned by `GET /v1/feed`.
#[derive(Debug, Serialize)]
pub struct FeedInfo {
    pub id: Option<Uuid>,
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub discussion_id: String,
    #[serde(rename = "type")]
    pub item_type: FeedItemType,
    pub action: TimelineAction,
    pub snapshot: serde_json::Value,
    pub timeline: Vec<TimelineEntry>,
    pub triggered_at_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl From<FeedItem> for FeedInfo {
    fn from(item: FeedItem) -> Self {
        Self {
            id: item.id,
            dao_id: item.dao_id,
            proposal_id: item.proposal_id,
            discussion_id: item.discussion_id,
            item_type: item.item_type,
            action: item.action,
            snapshot: item.snapshot,
            timeline: item.timeline.into_entries(),
            triggered_at_ms: item.triggered_at_ms,
            created_at_ms: item.created_at_ms,
            updated_at_ms: item.updated_at_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    items: Vec<FeedInfo>,
    total_count: u64,
}

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    validation::validate(&query)?;
    let filters = query.filters()?;
    let list = state.queries.get_by_filters(&filters).await?;
    Ok(Json(FeedResponse {
        items: list.items.into_iter().map(FeedInfo::from).collect(),
        total_count: list.total_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedEventsQuery {
    last_updated_at_ms: Option<i64>,
    types: Option<String>,
}

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

/// Server-sent `feed_item` events for the caller's subscribed DAOs. The
/// session ends when the client disconnects; a store failure is reported as
/// one `error` event before the stream closes.
pub async fn stream_feed_events(
    State(state): State<AppState>,
    Query(query): Query<FeedEventsQuery>,
    Extension(SubscriberContext(subscriber_id)): Extension<SubscriberContext>,
) -> Result<Response, ApiError> {
    let request = WatchRequest {
        subscriber_id,
        last_updated_at_ms: query.last_updated_at_ms.unwrap_or(0),
        types: parse_list("types", query.types.as_deref())?,
    };

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(STREAM_BUFFER);
    let changelog = state.changelog.clone();
    tokio::spawn(async move {
        observability::adjust_watch_sessions(1.0);
        let closed = tx.clone();
        let sender = tx.clone();
        let watched = changelog
            .watch(
                request,
                async move { closed.closed().await },
                |item| send_item(sender.clone(), item),
            )
            .await;

        match watched {
            Ok(summary) => debug!(
                subscriber = %subscriber_id,
                rounds = summary.rounds,
                delivered = summary.delivered,
                watermark_ms = summary.watermark_ms,
                "feed event stream closed"
            ),
            Err(err) => {
                warn!(subscriber = %subscriber_id, error = %err, "feed event stream failed");
                let _ = tx
                    .send(Ok(Event::default().event("error").data(err.to_string())))
                    .await;
            }
        }
        observability::adjust_watch_sessions(-1.0);
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
        .into_response())
}

async fn send_item(sender: EventSender, item: FeedItem) -> ControlFlow<()> {
    let converted = match convert_feed_event(&item) {
        Ok(converted) => converted,
        Err(err) => {
            warn!(item_id = ?item.id, dao_id = %item.dao_id, error = %err, "feed item skipped");
            return ControlFlow::Continue(());
        }
    };
    let event = match Event::default()
        .event("feed_item")
        .id(item.updated_at_ms.to_string())
        .json_data(&converted)
    {
        Ok(event) => event,
        Err(err) => {
            warn!(item_id = ?item.id, error = %err, "feed item not encodable");
            return ControlFlow::Continue(());
        }
    };

    if sender.send(Ok(event)).await.is_err() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}
