use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::DomainResult;
use crate::error::DomainError;
use crate::events::{DaoPayload, DelegatePayload, ProposalPayload};
use crate::items::{ChangelogQuery, FeedItem, FeedItemType};
use crate::notifier::ChangeNotifier;
use crate::ports::feed::FeedItemRepository;
use crate::ports::subscribers::SubscriptionProvider;
use crate::timeline::{TimelineAction, TimelineEntry};
use crate::util::{datetime_to_ms, format_ms_rfc3339, unix_seconds_to_ms};

#[derive(Clone, Debug)]
pub struct ChangelogConfig {
    pub page_limit: usize,
    pub forced_refresh: Duration,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            forced_refresh: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchRequest {
    pub subscriber_id: Uuid,
    pub last_updated_at_ms: i64,
    /// Empty means every type.
    pub types: Vec<FeedItemType>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub rounds: usize,
    pub delivered: usize,
    pub watermark_ms: i64,
}

enum WatchState {
    /// Pull the next page. A full page loops straight back here (draining);
    /// a short one moves to `Waiting`.
    Fetching,
    Waiting,
}

/// Long-lived "items changed since watermark" sessions.
#[derive(Clone)]
pub struct ChangelogService {
    repo: Arc<dyn FeedItemRepository>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    notifier: Arc<ChangeNotifier>,
    config: ChangelogConfig,
}

impl ChangelogService {
    pub fn new(
        repo: Arc<dyn FeedItemRepository>,
        subscriptions: Arc<dyn SubscriptionProvider>,
        notifier: Arc<ChangeNotifier>,
        config: ChangelogConfig,
    ) -> Self {
        Self {
            repo,
            subscriptions,
            notifier,
            config,
        }
    }

    /// Streams items of the subscriber's DAOs updated after the watermark,
    /// oldest first, until `cancel` resolves, `deliver` breaks, or the
    /// notifier closes. Store errors end the session.
    pub async fn watch<C, F, Fut>(
        &self,
        request: WatchRequest,
        cancel: C,
        mut deliver: F,
    ) -> DomainResult<WatchSummary>
    where
        C: Future<Output = ()>,
        F: FnMut(FeedItem) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        // Subscribe before the first fetch so no change slips between them.
        let mut signals = self.notifier.subscribe();
        tokio::pin!(cancel);

        let mut summary = WatchSummary {
            watermark_ms: request.last_updated_at_ms,
            ..WatchSummary::default()
        };
        let mut state = WatchState::Fetching;

        loop {
            match state {
                WatchState::Fetching => {
                    if cancel.as_mut().now_or_never().is_some() {
                        return Ok(summary);
                    }

                    let page = self.fetch_page(&request, summary.watermark_ms).await?;
                    summary.rounds += 1;
                    let fetched = page.len();
                    debug!(
                        subscriber_id = %request.subscriber_id,
                        fetched,
                        watermark_ms = summary.watermark_ms,
                        "changelog page fetched"
                    );

                    for item in page {
                        summary.watermark_ms = item.updated_at_ms;
                        summary.delivered += 1;
                        if deliver(item).await.is_break() {
                            return Ok(summary);
                        }
                    }

                    state = if fetched >= self.config.page_limit {
                        WatchState::Fetching
                    } else {
                        WatchState::Waiting
                    };
                }
                WatchState::Waiting => {
                    tokio::select! {
                        biased;
                        _ = cancel.as_mut() => return Ok(summary),
                        signal = signals.recv() => match signal {
                            Some(_) => state = WatchState::Fetching,
                            None => return Ok(summary),
                        },
                        _ = tokio::time::sleep(self.config.forced_refresh) => {
                            state = WatchState::Fetching;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_page(&self, request: &WatchRequest, watermark_ms: i64) -> DomainResult<Vec<FeedItem>> {
        let dao_ids = self.subscriptions.daos_of(request.subscriber_id).await?;
        if dao_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.repo
            .list_updated_since(&ChangelogQuery {
                dao_ids,
                types: request.types.clone(),
                updated_after_ms: watermark_ms,
                limit: self.config.page_limit,
            })
            .await
    }
}

/// Item as delivered on the changelog stream, with a typed snapshot view.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FeedEvent {
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub item_type: FeedItemType,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub snapshot: FeedEventView,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FeedEventView {
    Dao(DaoView),
    Proposal(ProposalView),
    Delegate(DelegateView),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DaoView {
    pub id: Uuid,
    pub alias: String,
    pub name: String,
    pub avatar: Option<String>,
    pub created_at: Option<String>,
    pub popularity_index: f64,
    pub verified: bool,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ProposalView {
    pub id: String,
    pub dao_id: Uuid,
    pub author: String,
    pub title: String,
    pub state: String,
    pub spam: bool,
    #[serde(rename = "type")]
    pub proposal_type: String,
    pub privacy: String,
    pub choices: Vec<String>,
    pub created_at_ms: i64,
    pub voting_start_ms: i64,
    pub voting_end_ms: i64,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DelegateView {
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub from: String,
    pub to: String,
    pub action: TimelineAction,
    pub due_date: Option<String>,
}

pub fn convert_feed_event(item: &FeedItem) -> DomainResult<FeedEvent> {
    let timeline = item.timeline.entries().to_vec();
    let view = match item.item_type {
        FeedItemType::Dao => {
            let payload: DaoPayload = decode_snapshot(item)?;
            FeedEventView::Dao(DaoView {
                id: payload.id,
                created_at: payload
                    .created_at
                    .map(|value| format_ms_rfc3339(datetime_to_ms(value))),
                alias: payload.alias,
                name: payload.name,
                avatar: payload.avatar,
                popularity_index: payload.popularity_index,
                verified: payload.verified,
                timeline,
            })
        }
        FeedItemType::Proposal => {
            let payload: ProposalPayload = decode_snapshot(item)?;
            FeedEventView::Proposal(ProposalView {
                id: payload.id,
                dao_id: payload.dao_id,
                author: payload.author,
                title: payload.title,
                state: payload.state,
                spam: payload.spam,
                proposal_type: payload.proposal_type,
                privacy: payload.privacy,
                choices: payload.choices,
                created_at_ms: unix_seconds_to_ms(payload.created),
                voting_start_ms: unix_seconds_to_ms(payload.start),
                voting_end_ms: unix_seconds_to_ms(payload.end),
                timeline,
            })
        }
        FeedItemType::Delegate => {
            let payload: DelegatePayload = decode_snapshot(item)?;
            FeedEventView::Delegate(DelegateView {
                dao_id: payload.dao_id,
                proposal_id: payload.proposal_id,
                from: payload.initiator,
                to: payload.delegator,
                action: item.action.clone(),
                due_date: payload
                    .due_date
                    .map(|value| format_ms_rfc3339(datetime_to_ms(value))),
            })
        }
    };

    Ok(FeedEvent {
        id: item.id,
        item_type: item.item_type,
        created_at_ms: item.created_at_ms,
        updated_at_ms: item.updated_at_ms,
        snapshot: view,
    })
}

fn decode_snapshot<T: serde::de::DeserializeOwned>(item: &FeedItem) -> DomainResult<T> {
    serde_json::from_value(item.snapshot.clone()).map_err(|err| {
        DomainError::Validation(format!(
            "{} snapshot is malformed: {err}",
            item.item_type.as_str()
        ))
    })
}
