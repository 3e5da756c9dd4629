use std::cmp::Ordering;

use serde::Serialize;
use uuid::Uuid;

use crate::items::{FeedItem, FeedItemType, FeedList};
use crate::timeline::TimelineAction;
use crate::util::unix_seconds_to_ms;

/// Proposal states in the order the "actuality" sort presents them.
pub const ACTUALITY_STATE_ORDER: [&str; 6] = [
    "active",
    "pending",
    "succeeded",
    "failed",
    "defeated",
    "canceled",
];

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Composable predicate, ordering or paging directive for feed queries.
///
/// Filters serialize to a canonical JSON form, which doubles as the query
/// cache key. Stores translate them into their own query language; the
/// in-memory evaluation in [`apply_filters`] is the reference semantics.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum FeedFilter {
    Page { offset: usize, limit: usize },
    DaoIds { ids: Vec<Uuid> },
    Types { types: Vec<FeedItemType> },
    Actions { actions: Vec<TimelineAction> },
    Active { is_active: bool },
    SkipSpammed,
    SkipCanceled,
    SkipDelegates,
    OrderByCreated { direction: SortDirection },
    OrderByTriggered { direction: SortDirection },
    OrderByActuality,
}

impl FeedFilter {
    /// Whether `item` passes this filter. Ordering and paging filters pass
    /// everything.
    pub fn matches(&self, item: &FeedItem, now_ms: i64) -> bool {
        match self {
            Self::DaoIds { ids } => ids.contains(&item.dao_id),
            Self::Types { types } => types.contains(&item.item_type),
            Self::Actions { actions } => actions.contains(&item.action),
            Self::Active { is_active } => match snapshot_i64(&item.snapshot, "end") {
                Some(end) => (unix_seconds_to_ms(end) >= now_ms) == *is_active,
                None => false,
            },
            Self::SkipSpammed => !snapshot_is_spam(&item.snapshot),
            Self::SkipCanceled => snapshot_str(&item.snapshot, "state") != Some("canceled"),
            Self::SkipDelegates => item.item_type != FeedItemType::Delegate,
            Self::Page { .. }
            | Self::OrderByCreated { .. }
            | Self::OrderByTriggered { .. }
            | Self::OrderByActuality => true,
        }
    }

    pub fn compare(&self, left: &FeedItem, right: &FeedItem) -> Ordering {
        match self {
            Self::OrderByCreated { direction } => {
                directed(left.created_at_ms.cmp(&right.created_at_ms), *direction)
            }
            Self::OrderByTriggered { direction } => {
                directed(left.triggered_at_ms.cmp(&right.triggered_at_ms), *direction)
            }
            Self::OrderByActuality => actuality_rank(left)
                .cmp(&actuality_rank(right))
                .then_with(|| right.created_at_ms.cmp(&left.created_at_ms)),
            _ => Ordering::Equal,
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::OrderByCreated { .. } | Self::OrderByTriggered { .. } | Self::OrderByActuality
        )
    }
}

/// Canonical key for a filter list. Filter order matters: it is the order of
/// the resulting query clauses.
pub fn cache_key(filters: &[FeedFilter]) -> String {
    serde_json::to_string(filters).unwrap_or_else(|_| format!("{filters:?}"))
}

/// Evaluates `filters` over an in-memory candidate set. The total count is
/// taken after predicates and before paging.
pub fn apply_filters(items: Vec<FeedItem>, filters: &[FeedFilter], now_ms: i64) -> FeedList {
    let mut matched: Vec<FeedItem> = items
        .into_iter()
        .filter(|item| filters.iter().all(|filter| filter.matches(item, now_ms)))
        .collect();
    let total_count = matched.len() as u64;

    let orderings: Vec<&FeedFilter> = filters.iter().filter(|f| f.is_ordering()).collect();
    if !orderings.is_empty() {
        matched.sort_by(|left, right| {
            orderings
                .iter()
                .fold(Ordering::Equal, |acc, filter| {
                    acc.then_with(|| filter.compare(left, right))
                })
        });
    }

    let page = filters.iter().rev().find_map(|filter| match filter {
        FeedFilter::Page { offset, limit } => Some((*offset, *limit)),
        _ => None,
    });
    let items = match page {
        Some((offset, limit)) => matched.into_iter().skip(offset).take(limit).collect(),
        None => matched,
    };

    FeedList { items, total_count }
}

pub fn snapshot_str<'a>(snapshot: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    snapshot.get(field).and_then(serde_json::Value::as_str)
}

pub fn snapshot_i64(snapshot: &serde_json::Value, field: &str) -> Option<i64> {
    snapshot.get(field).and_then(serde_json::Value::as_i64)
}

fn snapshot_is_spam(snapshot: &serde_json::Value) -> bool {
    match snapshot.get("spam") {
        Some(serde_json::Value::Bool(value)) => *value,
        Some(serde_json::Value::String(value)) => value.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn actuality_rank(item: &FeedItem) -> usize {
    snapshot_str(&item.snapshot, "state")
        .and_then(|state| {
            ACTUALITY_STATE_ORDER
                .iter()
                .position(|known| known.eq_ignore_ascii_case(state))
        })
        .unwrap_or(ACTUALITY_STATE_ORDER.len())
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proposal(dao_id: Uuid, id: &str, created_at_ms: i64, snapshot: serde_json::Value) -> FeedItem {
        let mut item = FeedItem::new(FeedItemType::Proposal, dao_id, id, snapshot);
        item.created_at_ms = created_at_ms;
        item
    }

    #[test]
    fn active_filter_composes_with_dao_filter() {
        let now_ms = 1_700_000_000_000;
        let dao_a = Uuid::new_v4();
        let dao_b = Uuid::new_v4();
        let items = vec![
            proposal(dao_a, "a-open", 1, json!({ "end": 1_700_000_100 })),
            proposal(dao_a, "a-closed", 2, json!({ "end": 1_600_000_000 })),
            proposal(dao_b, "b-open", 3, json!({ "end": 1_700_000_100 })),
        ];

        let list = apply_filters(
            items,
            &[
                FeedFilter::DaoIds { ids: vec![dao_a] },
                FeedFilter::Active { is_active: true },
            ],
            now_ms,
        );

        assert_eq!(list.total_count, 1);
        assert_eq!(list.items[0].proposal_id, "a-open");
    }

    #[test]
    fn skips_spam_canceled_and_delegates() {
        let dao_id = Uuid::new_v4();
        let mut delegate = FeedItem::new(FeedItemType::Delegate, dao_id, "p", json!({}));
        delegate.created_at_ms = 4;
        let items = vec![
            proposal(dao_id, "spam", 1, json!({ "spam": true })),
            proposal(dao_id, "canceled", 2, json!({ "state": "canceled" })),
            proposal(dao_id, "ok", 3, json!({ "state": "active" })),
            delegate,
        ];

        let list = apply_filters(
            items,
            &[
                FeedFilter::SkipSpammed,
                FeedFilter::SkipCanceled,
                FeedFilter::SkipDelegates,
            ],
            0,
        );

        assert_eq!(list.total_count, 1);
        assert_eq!(list.items[0].proposal_id, "ok");
    }

    #[test]
    fn orders_by_actuality_then_newest() {
        let dao_id = Uuid::new_v4();
        let items = vec![
            proposal(dao_id, "failed", 5, json!({ "state": "failed" })),
            proposal(dao_id, "active-old", 1, json!({ "state": "active" })),
            proposal(dao_id, "unknown", 9, json!({})),
            proposal(dao_id, "active-new", 2, json!({ "state": "active" })),
            proposal(dao_id, "pending", 3, json!({ "state": "pending" })),
        ];

        let list = apply_filters(items, &[FeedFilter::OrderByActuality], 0);
        let ids: Vec<_> = list.items.iter().map(|item| item.proposal_id.as_str()).collect();
        assert_eq!(ids, vec!["active-new", "active-old", "pending", "failed", "unknown"]);
    }

    #[test]
    fn pages_after_counting() {
        let dao_id = Uuid::new_v4();
        let items = (0..5)
            .map(|i| proposal(dao_id, &format!("p{i}"), i, json!({})))
            .collect();

        let list = apply_filters(
            items,
            &[
                FeedFilter::OrderByCreated {
                    direction: SortDirection::Desc,
                },
                FeedFilter::Page { offset: 1, limit: 2 },
            ],
            0,
        );

        assert_eq!(list.total_count, 5);
        let ids: Vec<_> = list.items.iter().map(|item| item.proposal_id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p2"]);
    }

    #[test]
    fn cache_key_is_stable_and_order_sensitive() {
        let first = [FeedFilter::SkipSpammed, FeedFilter::Active { is_active: true }];
        let second = [FeedFilter::Active { is_active: true }, FeedFilter::SkipSpammed];
        assert_eq!(cache_key(&first), cache_key(&first.clone()));
        assert_ne!(cache_key(&first), cache_key(&second));
        assert!(cache_key(&first).contains("skip_spammed"));
    }
}
