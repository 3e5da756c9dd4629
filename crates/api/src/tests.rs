use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use govfeed_domain::items::{FeedItem, FeedItemType};
use govfeed_domain::ports::feed::FeedItemRepository;
use govfeed_domain::timeline::{Timeline, TimelineAction, TimelineEntry};
use govfeed_domain::util::now_ms;
use govfeed_infra::config::AppConfig;
use govfeed_infra::stores::Stores;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::middleware::SUBSCRIBER_ID_HEADER;
use crate::routes;
use crate::state::AppState;

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        metrics_port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
        surreal_ns: "govfeed".to_string(),
        surreal_db: "feed_test".to_string(),
        surreal_user: "root".to_string(),
        surreal_pass: "root".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        bus_stream_prefix: "govfeed:bus:test".to_string(),
        bus_group_prefix: "govfeed-test".to_string(),
        bus_consumer_name: "test".to_string(),
        bus_block_ms: 100,
        bus_batch_size: 10,
        bus_retry_interval_ms: 1_000,
        change_channel: "govfeed:feed-events:test".to_string(),
        notifier_buffer: 16,
        watch_page_limit: 100,
        watch_forced_refresh_ms: 60_000,
        query_cache_enabled: true,
        cache_population_queue: 16,
    }
}

struct TestApp {
    state: AppState,
    stores: Stores,
    router: Router,
}

fn test_app() -> TestApp {
    let stores = Stores::in_memory();
    let state = AppState::with_stores(test_config(), stores.clone());
    let router = routes::router(state.clone());
    TestApp {
        state,
        stores,
        router,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, subscriber: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(subscriber) = subscriber {
        builder = builder.header(SUBSCRIBER_ID_HEADER, subscriber.to_string());
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str, subscriber: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(subscriber) = subscriber {
        builder = builder.header(SUBSCRIBER_ID_HEADER, subscriber.to_string());
    }
    builder.body(Body::empty()).expect("request")
}

async fn create_subscriber(app: &Router) -> Uuid {
    let (status, body) = send(
        app,
        json_request("POST", "/v1/subscribers", None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["subscriber_id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("subscriber id")
}

fn proposal_item(dao_id: Uuid, proposal_id: &str, snapshot: Value) -> FeedItem {
    let mut item = FeedItem::new(FeedItemType::Proposal, dao_id, proposal_id, snapshot);
    item.timeline = Timeline::from_entries(vec![TimelineEntry::new(
        now_ms() - 60_000,
        TimelineAction::ProposalCreated,
    )]);
    item.refresh_derived();
    item
}

#[tokio::test]
async fn health_reports_store() {
    let app = test_app();

    let (status, body) = send(&app.router, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn create_subscriber_rejects_non_http_webhook() {
    let app = test_app();

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/v1/subscribers",
            None,
            json!({ "webhook_url": "ftp://hooks.example.org" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn protected_routes_require_a_known_subscriber() {
    let app = test_app();
    let body = json!({ "dao_id": Uuid::new_v4() });

    let (missing, _) = send(
        &app.router,
        json_request("POST", "/v1/subscriptions", None, body.clone()),
    )
    .await;
    assert_eq!(missing, StatusCode::UNAUTHORIZED);

    let malformed = Request::builder()
        .method("POST")
        .uri("/v1/subscriptions")
        .header(CONTENT_TYPE, "application/json")
        .header(SUBSCRIBER_ID_HEADER, "not-a-uuid")
        .body(Body::from(body.to_string()))
        .expect("request");
    let (status, _) = send(&app.router, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (unknown, envelope) = send(
        &app.router,
        json_request("POST", "/v1/subscriptions", Some(Uuid::new_v4()), body),
    )
    .await;
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn webhook_can_be_replaced_by_its_subscriber() {
    let app = test_app();
    let subscriber = create_subscriber(&app.router).await;

    let (status, body) = send(
        &app.router,
        json_request(
            "PUT",
            "/v1/subscribers/me",
            Some(subscriber),
            json!({ "webhook_url": "https://hooks.example.org/feed" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["webhook_url"], "https://hooks.example.org/feed");
    let stored = app
        .state
        .subscribers
        .get_by_id(subscriber)
        .await
        .expect("stored");
    assert_eq!(stored.webhook_url, "https://hooks.example.org/feed");
}

#[tokio::test]
async fn subscription_lifecycle() {
    let app = test_app();
    let subscriber = create_subscriber(&app.router).await;
    let dao_id = Uuid::new_v4();

    let (first_status, first) = send(
        &app.router,
        json_request(
            "POST",
            "/v1/subscriptions",
            Some(subscriber),
            json!({ "dao_id": dao_id }),
        ),
    )
    .await;
    let (_, again) = send(
        &app.router,
        json_request(
            "POST",
            "/v1/subscriptions",
            Some(subscriber),
            json!({ "dao_id": dao_id }),
        ),
    )
    .await;
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(first["subscription_id"], again["subscription_id"]);
    assert_eq!(
        app.state
            .subscriptions
            .subscribers_of(dao_id)
            .await
            .expect("subscribers"),
        vec![subscriber]
    );

    let uri = format!("/v1/subscriptions/{dao_id}");
    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(uri.as_str())
            .header(SUBSCRIBER_ID_HEADER, subscriber.to_string())
            .body(Body::empty())
            .expect("request")
    };
    let (removed, _) = send(&app.router, delete()).await;
    assert_eq!(removed, StatusCode::NO_CONTENT);
    let (absent, body) = send(&app.router, delete()).await;
    assert_eq!(absent, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn feed_query_applies_fixed_exclusions() {
    let app = test_app();
    let dao_id = Uuid::new_v4();
    let now_s = now_ms() / 1_000;
    let repo = &app.stores.feed_items;

    let mut dao = FeedItem::new(FeedItemType::Dao, dao_id, "", json!({ "id": dao_id }));
    dao.timeline = Timeline::from_entries(vec![TimelineEntry::new(
        now_ms() - 120_000,
        TimelineAction::DaoCreated,
    )]);
    dao.refresh_derived();
    repo.save(&dao).await.expect("dao");
    repo.save(&proposal_item(
        dao_id,
        "0xactive",
        json!({ "id": "0xactive", "dao_id": dao_id, "state": "active", "end": now_s + 3_600 }),
    ))
    .await
    .expect("active");
    repo.save(&proposal_item(
        dao_id,
        "0xspam",
        json!({ "id": "0xspam", "dao_id": dao_id, "spam": true, "end": now_s + 3_600 }),
    ))
    .await
    .expect("spam");
    repo.save(&proposal_item(
        dao_id,
        "0xcanceled",
        json!({ "id": "0xcanceled", "dao_id": dao_id, "state": "canceled" }),
    ))
    .await
    .expect("canceled");
    let mut delegate = FeedItem::new(
        FeedItemType::Delegate,
        dao_id,
        "0xactive",
        json!({ "dao_id": dao_id }),
    );
    delegate.action = TimelineAction::DelegateVotingVoted;
    repo.save(&delegate).await.expect("delegate");
    repo.save(&proposal_item(
        Uuid::new_v4(),
        "0xother",
        json!({ "id": "0xother", "state": "active" }),
    ))
    .await
    .expect("other dao");

    let (status, body) = send(
        &app.router,
        get_request(&format!("/v1/feed?dao_ids={dao_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);
    let proposals: Vec<&str> = body["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|item| item["proposal_id"].as_str())
        .collect();
    // Newest first; the dao item has an empty proposal id.
    assert_eq!(proposals, vec!["0xactive", ""]);

    let (_, active) = send(
        &app.router,
        get_request(&format!("/v1/feed?dao_ids={dao_id}&is_active=true"), None),
    )
    .await;
    assert_eq!(active["total_count"], 1);
    assert_eq!(active["items"][0]["type"], "proposal");
    assert_eq!(active["items"][0]["action"], "proposal.created");
}

#[tokio::test]
async fn feed_query_rejects_out_of_range_limit() {
    let app = test_app();

    let (status, body) = send(&app.router, get_request("/v1/feed?limit=0", None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn feed_events_stream_delivers_subscribed_items() {
    let app = test_app();
    let subscriber = create_subscriber(&app.router).await;
    let dao_id = Uuid::new_v4();
    app.state
        .subscriptions
        .subscribe(subscriber, dao_id)
        .await
        .expect("subscribe");
    app.stores
        .feed_items
        .save(&proposal_item(
            dao_id,
            "0xstream",
            json!({ "id": "0xstream", "dao_id": dao_id, "title": "Fund grants" }),
        ))
        .await
        .expect("seed");

    let response = app
        .router
        .clone()
        .oneshot(get_request(
            "/v1/feed/events?last_updated_at_ms=0&types=proposal",
            Some(subscriber),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let mut frames = response.into_body().into_data_stream();
    let mut received = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains("Fund grants") {
            let frame = frames.next().await.expect("frame").expect("bytes");
            received.push_str(&String::from_utf8_lossy(&frame));
        }
    })
    .await
    .expect("feed_item event");

    assert!(received.contains("event: feed_item"));
    assert!(received.contains("0xstream"));
}

#[tokio::test]
async fn feed_events_stream_requires_subscriber() {
    let app = test_app();

    let (status, _) = send(&app.router, get_request("/v1/feed/events", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
