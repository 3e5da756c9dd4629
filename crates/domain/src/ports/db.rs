use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("db unavailable: {0}")]
    Unavailable(String),
    #[error("db operation failed: {0}")]
    Operation(String),
}

/// Liveness probe for whichever store backs the feed.
pub trait DbAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>>;
}

pub struct InMemoryDbAdapter;

impl DbAdapter for InMemoryDbAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async { Ok(()) })
    }
}
