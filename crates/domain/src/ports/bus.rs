use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::BoxFuture;
use crate::error::DomainError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("bus serialization error: {0}")]
    Serialization(String),
    #[error("bus operation failed: {0}")]
    Operation(String),
}

/// Outcome of a handler invocation. Any error leaves the message
/// unacknowledged so the bus redelivers it.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub trait EventPublisher: Send + Sync {
    fn publish_json(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> BoxFuture<'_, Result<(), BusError>>;
}

pub trait MessageHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        subject: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Delivery settings for one durable consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Durable group shared by all instances of a consumer family.
    pub group: String,
    /// Upper bound on messages fetched and in flight per read.
    pub max_ack_pending: usize,
    /// Time after which an unacknowledged message is redelivered.
    pub ack_wait: Duration,
}

pub trait BusSubscription: Send {
    fn subject(&self) -> &str;

    /// Stops fetching and waits for the in-flight handler to finish.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), BusError>>;
}

pub trait EventSubscriber: Send + Sync {
    fn subscribe(
        &self,
        subject: &str,
        options: &ConsumerOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> BoxFuture<'_, Result<Box<dyn BusSubscription>, BusError>>;
}
