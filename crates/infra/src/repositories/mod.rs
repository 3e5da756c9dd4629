mod feed;
mod subscribers;

pub use feed::SurrealFeedItemRepository;
pub use subscribers::{SurrealSubscriberRepository, SurrealSubscriptionRepository};

use govfeed_domain::error::DomainError;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let message = err.to_string().to_lowercase();
    if message.contains("already exists")
        || message.contains("duplicate")
        || message.contains("unique")
    {
        return DomainError::Conflict;
    }
    DomainError::Storage(format!("surreal query failed: {message}"))
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Result<Vec<T>, DomainError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row)
                .map_err(|err| DomainError::Storage(format!("invalid {what} row: {err}")))
        })
        .collect()
}

fn parse_uuid(value: &str, what: &str) -> Result<uuid::Uuid, DomainError> {
    uuid::Uuid::parse_str(value)
        .map_err(|err| DomainError::Storage(format!("invalid {what} '{value}': {err}")))
}
