use std::sync::Arc;

use govfeed_domain::DomainResult;
use govfeed_domain::error::DomainError;
use govfeed_domain::filters::{ACTUALITY_STATE_ORDER, FeedFilter, SortDirection};
use govfeed_domain::items::{ChangelogQuery, FeedItem, FeedItemKey, FeedItemType, FeedList};
use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::feed::FeedItemRepository;
use govfeed_domain::timeline::{Timeline, TimelineAction, TimelineEntry};
use govfeed_domain::util::now_ms;
use serde::Deserialize;
use serde_json::{Value, json};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use uuid::Uuid;

use super::{decode_rows, map_surreal_error, parse_uuid};

const FIELDS: &str = "item_id, dao_id, proposal_id, discussion_id, type, action, snapshot, \
                      timeline, triggered_at_ms, created_at_ms, updated_at_ms";

const ASSIGNMENTS: &str = "dao_id = $dao_id, \
                           proposal_id = $proposal_id, \
                           discussion_id = $discussion_id, \
                           type = $type, \
                           action = $action, \
                           snapshot = $snapshot, \
                           timeline = $timeline, \
                           triggered_at_ms = $triggered_at_ms, \
                           updated_at_ms = $now";

#[derive(Debug, Deserialize)]
struct FeedItemRow {
    item_id: String,
    dao_id: String,
    #[serde(default)]
    proposal_id: String,
    #[serde(default)]
    discussion_id: String,
    #[serde(rename = "type")]
    item_type: FeedItemType,
    #[serde(default)]
    action: String,
    #[serde(default)]
    snapshot: Value,
    #[serde(default)]
    timeline: Vec<TimelineEntry>,
    #[serde(default)]
    triggered_at_ms: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl FeedItemRow {
    fn into_item(self) -> DomainResult<FeedItem> {
        Ok(FeedItem {
            id: Some(parse_uuid(&self.item_id, "feed item id")?),
            dao_id: parse_uuid(&self.dao_id, "dao id")?,
            proposal_id: self.proposal_id,
            discussion_id: self.discussion_id,
            item_type: self.item_type,
            action: TimelineAction::parse(&self.action),
            snapshot: self.snapshot,
            timeline: Timeline::from_entries(self.timeline),
            triggered_at_ms: self.triggered_at_ms,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

fn decode_items(rows: Vec<Value>) -> DomainResult<Vec<FeedItem>> {
    decode_rows::<FeedItemRow>(rows, "feed item")?
        .into_iter()
        .map(FeedItemRow::into_item)
        .collect()
}

/// SurrealQL rendering of a filter list. Mirrors the in-memory evaluation
/// in `govfeed_domain::filters::apply_filters`.
#[derive(Debug, Default, PartialEq)]
struct FilterQuery {
    conditions: Vec<String>,
    order: Vec<String>,
    page: Option<(usize, usize)>,
    with_rank: bool,
    bindings: Vec<(String, Value)>,
}

impl FilterQuery {
    fn render(filters: &[FeedFilter], now_ms: i64) -> Self {
        let mut query = Self::default();
        for filter in filters {
            match filter {
                FeedFilter::Page { offset, limit } => query.page = Some((*offset, *limit)),
                FeedFilter::DaoIds { ids } => {
                    let param = query.bind(json!(ids));
                    query.conditions.push(format!("dao_id IN ${param}"));
                }
                FeedFilter::Types { types } => {
                    let param = query.bind(json!(types));
                    query.conditions.push(format!("type IN ${param}"));
                }
                FeedFilter::Actions { actions } => {
                    let tags: Vec<String> = actions
                        .iter()
                        .map(|action| action.as_str().to_ascii_lowercase())
                        .collect();
                    let param = query.bind(json!(tags));
                    query
                        .conditions
                        .push(format!("string::lowercase(action ?? '') IN ${param}"));
                }
                FeedFilter::Active { is_active } => {
                    let param = query.bind(json!(now_ms));
                    let comparison = if *is_active { ">=" } else { "<" };
                    query.conditions.push(format!(
                        "(type::is::number(snapshot.end) AND snapshot.end * 1000 {comparison} ${param})"
                    ));
                }
                FeedFilter::SkipSpammed => query
                    .conditions
                    .push("string::lowercase(<string>(snapshot.spam ?? false)) != 'true'".to_string()),
                FeedFilter::SkipCanceled => query
                    .conditions
                    .push("(snapshot.state ?? '') != 'canceled'".to_string()),
                FeedFilter::SkipDelegates => query
                    .conditions
                    .push(format!("type != '{}'", FeedItemType::Delegate.as_str())),
                FeedFilter::OrderByCreated { direction } => query
                    .order
                    .push(format!("created_at_ms {}", keyword(*direction))),
                FeedFilter::OrderByTriggered { direction } => query
                    .order
                    .push(format!("triggered_at_ms {}", keyword(*direction))),
                FeedFilter::OrderByActuality => {
                    if !query.with_rank {
                        query.with_rank = true;
                        query
                            .bindings
                            .push(("actuality_states".to_string(), json!(ACTUALITY_STATE_ORDER)));
                    }
                    query.order.push("actuality_rank ASC".to_string());
                    query.order.push("created_at_ms DESC".to_string());
                }
            }
        }
        query
    }

    fn bind(&mut self, value: Value) -> String {
        let name = format!("p{}", self.bindings.len());
        self.bindings.push((name.clone(), value));
        name
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn count_statement(&self) -> String {
        format!(
            "SELECT count() AS total FROM feed_item{} GROUP ALL;",
            self.where_clause()
        )
    }

    fn select_statement(&self) -> String {
        let mut statement = format!("SELECT {FIELDS}");
        if self.with_rank {
            statement.push_str(&format!(
                ", (array::find_index($actuality_states, string::lowercase(<string>(snapshot.state ?? ''))) ?? {}) AS actuality_rank",
                ACTUALITY_STATE_ORDER.len()
            ));
        }
        statement.push_str(" FROM feed_item");
        statement.push_str(&self.where_clause());
        if !self.order.is_empty() {
            statement.push_str(&format!(" ORDER BY {}", self.order.join(", ")));
        }
        if let Some((offset, limit)) = self.page {
            statement.push_str(&format!(" LIMIT {limit} START {offset}"));
        }
        statement.push(';');
        statement
    }
}

fn keyword(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

#[derive(Clone)]
pub struct SurrealFeedItemRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealFeedItemRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    async fn upsert_keyed(&self, key: FeedItemKey, item: FeedItem, now: i64) -> DomainResult<FeedItem> {
        let statement = format!(
            "UPSERT type::thing('feed_item', $key) SET \
                item_id = item_id ?? $item_id, \
                created_at_ms = created_at_ms ?? $now, \
                {ASSIGNMENTS} \
             RETURN {FIELDS};"
        );
        let pending = self
            .client
            .query(statement)
            .bind(("key", key.to_string()))
            .bind(("item_id", item.id.unwrap_or_else(Uuid::now_v7).to_string()));
        let mut response = bind_item(pending, &item, now)
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        decode_items(rows)?
            .pop()
            .ok_or_else(|| DomainError::Storage("upsert returned no row".to_string()))
    }

    async fn insert(&self, item: FeedItem, now: i64) -> DomainResult<FeedItem> {
        let statement = format!(
            "CREATE feed_item SET \
                item_id = $item_id, \
                created_at_ms = $now, \
                {ASSIGNMENTS} \
             RETURN {FIELDS};"
        );
        let pending = self
            .client
            .query(statement)
            .bind(("item_id", Uuid::now_v7().to_string()));
        let mut response = bind_item(pending, &item, now)
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        decode_items(rows)?
            .pop()
            .ok_or_else(|| DomainError::Storage("create returned no row".to_string()))
    }
}

fn bind_item<'r>(
    pending: surrealdb::method::Query<'r, Client>,
    item: &FeedItem,
    now: i64,
) -> surrealdb::method::Query<'r, Client> {
    pending
        .bind(("dao_id", item.dao_id.to_string()))
        .bind(("proposal_id", item.proposal_id.clone()))
        .bind(("discussion_id", item.discussion_id.clone()))
        .bind(("type", item.item_type.as_str()))
        .bind(("action", item.action.as_str().to_string()))
        .bind(("snapshot", item.snapshot.clone()))
        .bind(("timeline", json!(item.timeline)))
        .bind(("triggered_at_ms", item.triggered_at_ms))
        .bind(("now", now))
}

impl FeedItemRepository for SurrealFeedItemRepository {
    fn save(&self, item: &FeedItem) -> BoxFuture<'_, DomainResult<FeedItem>> {
        let item = item.clone();
        Box::pin(async move {
            let now = now_ms();
            match item.natural_key() {
                Some(key) => self.upsert_keyed(key, item, now).await,
                None => self.insert(item, now).await,
            }
        })
    }

    fn get_dao_item(&self, dao_id: Uuid) -> BoxFuture<'_, DomainResult<Option<FeedItem>>> {
        let client = self.client.clone();
        Box::pin(async move {
            let key = FeedItemKey {
                dao_id,
                proposal_id: String::new(),
                item_type: FeedItemType::Dao,
            };
            let mut response = client
                .query(format!("SELECT {FIELDS} FROM type::thing('feed_item', $key);"))
                .bind(("key", key.to_string()))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            Ok(decode_items(rows)?.pop())
        })
    }

    fn get_proposal_item(
        &self,
        proposal_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<FeedItem>>> {
        let proposal_id = proposal_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {FIELDS} FROM feed_item \
                     WHERE type = 'proposal' AND proposal_id = $proposal_id LIMIT 1;"
                ))
                .bind(("proposal_id", proposal_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            Ok(decode_items(rows)?.pop())
        })
    }

    fn get_by_filters(&self, filters: &[FeedFilter]) -> BoxFuture<'_, DomainResult<FeedList>> {
        let query = FilterQuery::render(filters, now_ms());
        let client = self.client.clone();
        Box::pin(async move {
            let statement = format!("{} {}", query.count_statement(), query.select_statement());
            let mut pending = client.query(statement);
            for binding in query.bindings {
                pending = pending.bind(binding);
            }
            let mut response = pending.await.map_err(map_surreal_error)?;
            let totals: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(1).map_err(map_surreal_error)?;
            let total_count = totals
                .first()
                .and_then(|row| row.get("total"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Ok(FeedList {
                items: decode_items(rows)?,
                total_count,
            })
        })
    }

    fn list_updated_since(
        &self,
        query: &ChangelogQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<FeedItem>>> {
        let query = query.clone();
        let client = self.client.clone();
        Box::pin(async move {
            if query.dao_ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut statement = format!(
                "SELECT {FIELDS} FROM feed_item \
                 WHERE updated_at_ms > $after AND dao_id IN $dao_ids"
            );
            if !query.types.is_empty() {
                statement.push_str(" AND type IN $types");
            }
            statement.push_str(" ORDER BY updated_at_ms ASC LIMIT $limit;");
            let dao_ids: Vec<String> = query.dao_ids.iter().map(Uuid::to_string).collect();
            let types: Vec<&'static str> = query.types.iter().map(FeedItemType::as_str).collect();
            let mut response = client
                .query(statement)
                .bind(("after", query.updated_after_ms))
                .bind(("dao_ids", dao_ids))
                .bind(("types", types))
                .bind(("limit", query.limit as i64))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
            decode_items(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_predicates_in_filter_order() {
        let dao_id = Uuid::new_v4();
        let query = FilterQuery::render(
            &[
                FeedFilter::DaoIds { ids: vec![dao_id] },
                FeedFilter::Types {
                    types: vec![FeedItemType::Proposal],
                },
                FeedFilter::Active { is_active: true },
                FeedFilter::SkipDelegates,
            ],
            1_000,
        );

        assert_eq!(
            query.where_clause(),
            " WHERE dao_id IN $p0 AND type IN $p1 AND \
             (type::is::number(snapshot.end) AND snapshot.end * 1000 >= $p2) AND type != 'delegate'"
        );
        assert_eq!(query.bindings[0].1, json!([dao_id]));
        assert_eq!(query.bindings[1].1, json!(["proposal"]));
        assert_eq!(query.bindings[2].1, json!(1_000));
    }

    #[test]
    fn renders_ordering_and_last_page() {
        let query = FilterQuery::render(
            &[
                FeedFilter::Page { offset: 0, limit: 10 },
                FeedFilter::OrderByActuality,
                FeedFilter::OrderByTriggered {
                    direction: SortDirection::Asc,
                },
                FeedFilter::Page { offset: 20, limit: 5 },
            ],
            0,
        );

        let statement = query.select_statement();
        assert!(statement.contains("AS actuality_rank FROM feed_item"));
        assert!(statement.ends_with(
            " ORDER BY actuality_rank ASC, created_at_ms DESC, triggered_at_ms ASC LIMIT 5 START 20;"
        ));
        assert_eq!(
            query.count_statement(),
            "SELECT count() AS total FROM feed_item GROUP ALL;"
        );
    }

    #[test]
    fn lowercases_action_tags() {
        let query = FilterQuery::render(
            &[FeedFilter::Actions {
                actions: vec![TimelineAction::parse("Proposal.Voting.Ended")],
            }],
            0,
        );

        assert_eq!(query.bindings[0].1, json!(["proposal.voting.ended"]));
    }

    #[test]
    fn decodes_stored_rows() {
        let item_id = Uuid::new_v4();
        let dao_id = Uuid::new_v4();
        let items = decode_items(vec![json!({
            "item_id": item_id.to_string(),
            "dao_id": dao_id.to_string(),
            "proposal_id": "0xabc",
            "type": "proposal",
            "action": "proposal.created",
            "snapshot": { "state": "active" },
            "timeline": [{ "created_at_ms": 5, "action": "proposal.created" }],
            "triggered_at_ms": 5,
            "created_at_ms": 10,
            "updated_at_ms": 11
        })])
        .expect("decode");

        assert_eq!(items[0].id, Some(item_id));
        assert_eq!(items[0].action, TimelineAction::ProposalCreated);
        assert_eq!(items[0].timeline.len(), 1);
        assert!(decode_items(vec![json!({ "item_id": "nope" })]).is_err());
    }
}
