use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::BoxFuture;

/// Notifier key every changelog watcher listens on.
pub const FEED_EVENTS_KEY: &str = "feed events";

/// Key of a change that only invalidates caches; watchers are not woken.
pub const FEED_SAVED_KEY: &str = "feed saved";

/// "Something in the feed changed" wake-up. Carries the identity of the
/// changed item so remote processes can drop stale cache entries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedChange {
    pub key: String,
    pub dao_id: Uuid,
    pub proposal_id: String,
}

impl FeedChange {
    pub fn feed_events(dao_id: Uuid, proposal_id: impl Into<String>) -> Self {
        Self {
            key: FEED_EVENTS_KEY.to_string(),
            dao_id,
            proposal_id: proposal_id.into(),
        }
    }

    pub fn saved(dao_id: Uuid, proposal_id: impl Into<String>) -> Self {
        Self {
            key: FEED_SAVED_KEY.to_string(),
            dao_id,
            proposal_id: proposal_id.into(),
        }
    }

    pub fn wakes_watchers(&self) -> bool {
        self.key == FEED_EVENTS_KEY
    }
}

pub trait ChangeSignal: Send + Sync {
    fn signal(&self, change: &FeedChange) -> BoxFuture<'_, ()>;
}
