//! Event bus over Redis Streams.
//!
//! Every subject maps to one stream, `{prefix}:{subject}`, whose entries
//! carry the JSON body in a `payload` field. Durable consumers are Redis
//! consumer groups: a message stays in the group's pending list until the
//! handler succeeds and it is acknowledged. Entries idle for `ack_wait` are
//! claimed with `XAUTOCLAIM`, whichever group member left them pending.

use std::sync::Arc;
use std::time::{Duration, Instant};

use govfeed_domain::ports::BoxFuture;
use govfeed_domain::ports::bus::{
    BusError, BusSubscription, ConsumerOptions, EventPublisher, EventSubscriber, MessageHandler,
};
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PAYLOAD_FIELD: &str = "payload";
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub stream_prefix: String,
    pub consumer_name: String,
    pub block: Duration,
}

#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    manager: ConnectionManager,
    config: RedisBusConfig,
}

impl RedisEventBus {
    pub async fn connect(redis_url: &str, config: RedisBusConfig) -> Result<Self, BusError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| BusError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| BusError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            manager,
            config,
        })
    }

    pub fn stream_key(&self, subject: &str) -> String {
        stream_key(&self.config.stream_prefix, subject)
    }

    async fn ensure_group(&self, key: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => {
                info!(stream = key, group, "consumer group created");
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(BusError::Operation(err.to_string())),
        }
    }
}

pub fn stream_key(prefix: &str, subject: &str) -> String {
    format!("{prefix}:{subject}")
}

impl EventPublisher for RedisEventBus {
    fn publish_json(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> BoxFuture<'_, Result<(), BusError>> {
        let key = self.stream_key(subject);
        let body = serde_json::to_vec(payload);
        Box::pin(async move {
            let body = body.map_err(|err| BusError::Serialization(err.to_string()))?;
            let mut conn = self.manager.clone();
            let id: String = conn
                .xadd(&key, "*", &[(PAYLOAD_FIELD, body)])
                .await
                .map_err(|err| BusError::Operation(err.to_string()))?;
            debug!(stream = %key, id, "event published");
            Ok(())
        })
    }
}

impl EventSubscriber for RedisEventBus {
    fn subscribe(
        &self,
        subject: &str,
        options: &ConsumerOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> BoxFuture<'_, Result<Box<dyn BusSubscription>, BusError>> {
        let subject = subject.to_string();
        let options = options.clone();
        Box::pin(async move {
            let key = self.stream_key(&subject);
            self.ensure_group(&key, &options.group).await?;

            // Blocking reads get a dedicated connection so they never stall
            // publishes on the shared manager.
            let conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|err| BusError::Unavailable(err.to_string()))?;
            let (shutdown, shutdown_rx) = watch::channel(false);
            let consumer = StreamConsumer {
                subject: subject.clone(),
                key,
                group: options.group.clone(),
                consumer: self.config.consumer_name.clone(),
                block: self.config.block,
                batch: options.max_ack_pending.max(1),
                ack_wait: options.ack_wait,
                handler,
                conn,
            };
            let task = tokio::spawn(consumer.run(shutdown_rx));
            info!(subject, group = %options.group, "bus subscription started");

            Ok(Box::new(RedisSubscription {
                subject,
                shutdown,
                task,
            }) as Box<dyn BusSubscription>)
        })
    }
}

pub struct RedisSubscription {
    subject: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BusSubscription for RedisSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BusError>> {
        Box::pin(async move {
            let _ = self.shutdown.send(true);
            self.task
                .await
                .map_err(|err| BusError::Operation(format!("consumer task failed: {err}")))?;
            info!(subject = %self.subject, "bus subscription closed");
            Ok(())
        })
    }
}

struct StreamConsumer {
    subject: String,
    key: String,
    group: String,
    consumer: String,
    block: Duration,
    batch: usize,
    ack_wait: Duration,
    handler: Arc<dyn MessageHandler>,
    conn: MultiplexedConnection,
}

enum ReadFrom {
    /// Entries idle for `ack_wait` in any group member's pending list,
    /// claimed for this consumer starting at the cursor.
    Idle { cursor: String },
    New,
}

const CLAIM_START: &str = "0-0";

impl StreamConsumer {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        // Start with the backlog left over by crashed or renamed consumers.
        let mut last_sweep: Option<Instant> = None;
        let mut claim_cursor = CLAIM_START.to_string();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let sweep_due = claim_cursor != CLAIM_START
                || last_sweep
                    .map(|at| at.elapsed() >= self.ack_wait)
                    .unwrap_or(true);
            let from = if sweep_due {
                last_sweep = Some(Instant::now());
                ReadFrom::Idle {
                    cursor: claim_cursor.clone(),
                }
            } else {
                ReadFrom::New
            };

            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = self.read(&from) => read,
            };
            match read {
                Ok((next_cursor, entries)) => {
                    if let Some(next_cursor) = next_cursor {
                        claim_cursor = next_cursor;
                    }
                    if matches!(from, ReadFrom::Idle { .. }) && !entries.is_empty() {
                        debug!(
                            subject = %self.subject,
                            claimed = entries.len(),
                            "idle entries claimed"
                        );
                    }
                    for entry in entries {
                        self.process(entry).await;
                    }
                }
                Err(err) => {
                    warn!(subject = %self.subject, error = %err, "stream read failed");
                    claim_cursor = CLAIM_START.to_string();
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        debug!(subject = %self.subject, "stream consumer stopped");
    }

    /// Returns the next claim cursor for idle sweeps alongside the entries.
    async fn read(
        &mut self,
        from: &ReadFrom,
    ) -> redis::RedisResult<(Option<String>, Vec<StreamId>)> {
        match from {
            ReadFrom::Idle { cursor } => {
                let reply: redis::Value = redis::cmd("XAUTOCLAIM")
                    .arg(&self.key)
                    .arg(&self.group)
                    .arg(&self.consumer)
                    .arg(self.ack_wait.as_millis() as u64)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(self.batch)
                    .query_async(&mut self.conn)
                    .await?;
                let (next_cursor, entries) = parse_autoclaim(reply)?;
                Ok((Some(next_cursor), entries))
            }
            ReadFrom::New => {
                let options = StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .count(self.batch)
                    .block(self.block.as_millis() as usize);
                let reply: Option<StreamReadReply> = self
                    .conn
                    .xread_options(&[self.key.as_str()], &[">"], &options)
                    .await?;
                let entries = reply
                    .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
                    .unwrap_or_default();
                Ok((None, entries))
            }
        }
    }

    /// Runs the handler for one entry and acknowledges it on success.
    async fn process(&mut self, entry: StreamId) {
        let Some(payload) = entry.get::<Vec<u8>>(PAYLOAD_FIELD) else {
            warn!(subject = %self.subject, id = %entry.id, "entry without payload dropped");
            self.ack(&entry.id).await;
            return;
        };
        match self.handler.handle(&self.subject, &payload).await {
            Ok(()) => self.ack(&entry.id).await,
            Err(err) => warn!(
                subject = %self.subject,
                id = %entry.id,
                error = %err,
                "handler failed, message left pending"
            ),
        }
    }

    async fn ack(&mut self, id: &str) {
        let acked: redis::RedisResult<i64> =
            self.conn.xack(&self.key, &self.group, &[id]).await;
        if let Err(err) = acked {
            warn!(subject = %self.subject, id, error = %err, "ack failed");
        }
    }
}

/// Splits an `XAUTOCLAIM` reply into the next cursor and the claimed
/// entries. Entries deleted from the stream while pending come back without
/// fields (Redis 6.2) or in a trailing id list (Redis 7); both are skipped.
fn parse_autoclaim(reply: redis::Value) -> redis::RedisResult<(String, Vec<StreamId>)> {
    let redis::Value::Array(parts) = reply else {
        return Err(malformed_claim("reply is not an array"));
    };
    let mut parts = parts.into_iter();
    let cursor: String = match parts.next() {
        Some(value) => redis::from_redis_value(&value)?,
        None => return Err(malformed_claim("missing cursor")),
    };
    let raw_entries = match parts.next() {
        Some(redis::Value::Array(entries)) => entries,
        Some(redis::Value::Nil) | None => Vec::new(),
        Some(_) => return Err(malformed_claim("entries are not an array")),
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw in raw_entries {
        let redis::Value::Array(pair) = raw else {
            return Err(malformed_claim("entry is not an array"));
        };
        let mut pair = pair.into_iter();
        let id: String = match pair.next() {
            Some(value) => redis::from_redis_value(&value)?,
            None => return Err(malformed_claim("entry without id")),
        };
        let fields = match pair.next() {
            Some(redis::Value::Array(fields)) => fields,
            Some(redis::Value::Nil) | None => continue,
            Some(_) => return Err(malformed_claim("entry fields are not an array")),
        };
        let mut map = std::collections::HashMap::with_capacity(fields.len() / 2);
        let mut fields = fields.into_iter();
        while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
            map.insert(redis::from_redis_value::<String>(&name)?, value);
        }
        entries.push(StreamId { id, map });
    }
    Ok((cursor, entries))
}

fn malformed_claim(detail: &'static str) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "malformed XAUTOCLAIM reply",
        detail.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    fn entry(id: &str, payload: &str) -> Value {
        Value::Array(vec![
            bulk(id),
            Value::Array(vec![bulk(PAYLOAD_FIELD), bulk(payload)]),
        ])
    }

    #[test]
    fn claim_reply_yields_cursor_and_entries() {
        let reply = Value::Array(vec![
            bulk("1700000000000-3"),
            Value::Array(vec![
                entry("1700000000000-1", r#"{"id":1}"#),
                entry("1700000000000-2", "{}"),
            ]),
            Value::Array(vec![bulk("1699999999999-0")]),
        ]);

        let (cursor, entries) = parse_autoclaim(reply).expect("parse");

        assert_eq!(cursor, "1700000000000-3");
        let ids: Vec<_> = entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["1700000000000-1", "1700000000000-2"]);
        assert_eq!(
            entries[0].get::<Vec<u8>>(PAYLOAD_FIELD),
            Some(br#"{"id":1}"#.to_vec())
        );
    }

    #[test]
    fn claim_reply_skips_deleted_entries() {
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                Value::Array(vec![bulk("1-0"), Value::Nil]),
                entry("2-0", "{}"),
            ]),
        ]);

        let (cursor, entries) = parse_autoclaim(reply).expect("parse");

        assert_eq!(cursor, CLAIM_START);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "2-0");
    }

    #[test]
    fn claim_reply_must_be_an_array() {
        assert!(parse_autoclaim(Value::Nil).is_err());
        assert!(parse_autoclaim(Value::Array(vec![bulk("0-0"), bulk("oops")])).is_err());
    }

    #[test]
    fn stream_key_joins_prefix_and_subject() {
        assert_eq!(
            stream_key("govfeed:bus", "core.dao.created"),
            "govfeed:bus:core.dao.created"
        );
    }
}
