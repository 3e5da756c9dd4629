use std::sync::Arc;
use std::time::Duration;

use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::bus::{
    BusSubscription, ConsumerOptions, EventPublisher, EventSubscriber, HandlerError,
    MessageHandler,
};
use govfeed_infra::bus::{RedisBusConfig, RedisEventBus};
use redis::AsyncCommands;
use redis::streams::StreamPendingReply;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

const SUBJECT: &str = "core.dao.created";

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn bus(prefix: &str, consumer_name: &str) -> RedisEventBus {
    RedisEventBus::connect(
        &redis_url(),
        RedisBusConfig {
            stream_prefix: prefix.to_string(),
            consumer_name: consumer_name.to_string(),
            block: Duration::from_millis(100),
        },
    )
    .await
    .expect("connect to redis")
}

#[derive(Default)]
struct Recorder {
    payloads: Mutex<Vec<serde_json::Value>>,
    fail: bool,
}

impl MessageHandler for Recorder {
    fn handle<'a>(
        &'a self,
        _subject: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let value: serde_json::Value = serde_json::from_slice(payload)
                .map_err(|err| HandlerError::Decode(err.to_string()))?;
            self.payloads.lock().await.push(value);
            if self.fail {
                return Err(HandlerError::Decode("handler unavailable".to_string()));
            }
            Ok(())
        })
    }
}

async fn wait_for(recorder: &Recorder, count: usize) -> bool {
    for _ in 0..100 {
        if recorder.payloads.lock().await.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// A message left pending by a consumer that is gone is claimed by another
/// member of the group once it has been idle for `ack_wait`.
#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn idle_entries_of_a_departed_consumer_are_reclaimed() {
    let prefix = format!("govfeed-test:{}", Uuid::new_v4());
    let options = ConsumerOptions {
        group: "govfeed-test".to_string(),
        max_ack_pending: 8,
        ack_wait: Duration::from_millis(300),
    };

    let departed = bus(&prefix, "worker-a").await;
    let failing = Arc::new(Recorder {
        fail: true,
        ..Recorder::default()
    });
    let subscription = departed
        .subscribe(SUBJECT, &options, failing.clone())
        .await
        .expect("subscribe worker-a");

    departed
        .publish_json(SUBJECT, &json!({ "id": "dao-1" }))
        .await
        .expect("publish");
    assert!(wait_for(&failing, 1).await, "worker-a never saw the message");
    subscription.close().await.expect("close worker-a");

    let survivor = bus(&prefix, "worker-b").await;
    let healthy = Arc::new(Recorder::default());
    let subscription = survivor
        .subscribe(SUBJECT, &options, healthy.clone())
        .await
        .expect("subscribe worker-b");

    assert!(wait_for(&healthy, 1).await, "worker-b never claimed the message");
    assert_eq!(healthy.payloads.lock().await[0], json!({ "id": "dao-1" }));
    subscription.close().await.expect("close worker-b");

    let mut conn = redis::Client::open(redis_url())
        .expect("client")
        .get_multiplexed_async_connection()
        .await
        .expect("connection");
    let key = survivor.stream_key(SUBJECT);
    let pending: StreamPendingReply = conn.xpending(&key, &options.group).await.expect("xpending");
    assert_eq!(pending.count(), 0);
    let _: i64 = conn.del(&key).await.expect("cleanup");
}
