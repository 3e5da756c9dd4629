//! Event classification and timeline merging for inbound governance events.
//!
//! Every function here is pure: the caller supplies the stored item (if any)
//! and the wall clock, and receives the merged item together with whether
//! the merge produced something subscribers should hear about.

mod dao;
mod delegate;
mod proposal;

pub use dao::{classify_dao_event, merge_dao_event};
pub use delegate::{build_delegate_item, delegate_action};
pub use proposal::{classify_proposal_event, merge_proposal_event};

use crate::items::FeedItem;
use crate::timeline::{Timeline, TimelineAction};

/// Where an event's timeline timestamp comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTime {
    WallClock,
    PayloadCreated,
    VoteStart,
    VoteEnd,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventClassification {
    pub action: TimelineAction,
    pub is_unique: bool,
    pub time: EventTime,
}

impl EventClassification {
    pub(crate) fn unique(action: TimelineAction, time: EventTime) -> Self {
        Self {
            action,
            is_unique: true,
            time,
        }
    }

    pub(crate) fn repeatable(action: TimelineAction) -> Self {
        Self {
            action,
            is_unique: false,
            time: EventTime::WallClock,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub item: FeedItem,
    /// False when a unique milestone was already recorded; the item is still
    /// persisted but nothing is fanned out.
    pub send_updates: bool,
}

/// Appends the classified entry. Returns whether subscribers should be told.
pub(crate) fn apply_classification(
    timeline: &mut Timeline,
    classification: &EventClassification,
    event_time_ms: i64,
) -> bool {
    if classification.is_unique {
        timeline.add_unique_action(event_time_ms, classification.action.clone())
    } else {
        timeline.add_non_unique_action(event_time_ms, classification.action.clone());
        true
    }
}
