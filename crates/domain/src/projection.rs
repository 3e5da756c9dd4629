//! Reduced feed payload delivered to subscriber webhooks, using the public
//! type and action vocabulary instead of internal timeline tags.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::items::{FeedItem, FeedItemType};
use crate::timeline::{TimelineAction, TimelineEntry};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExternalFeedType {
    Dao,
    Proposal,
}

impl From<FeedItemType> for ExternalFeedType {
    fn from(value: FeedItemType) -> Self {
        match value {
            FeedItemType::Proposal => Self::Proposal,
            FeedItemType::Dao | FeedItemType::Delegate => Self::Dao,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExternalAction {
    DaoCreated,
    DaoUpdated,
    ProposalCreated,
    ProposalUpdated,
    ProposalVotingStartsSoon,
    ProposalVotingStarted,
    ProposalVotingQuorumReached,
    ProposalVotingEndsSoon,
    ProposalVotingEnded,
}

impl ExternalAction {
    /// Delegate and unknown tags have no public counterpart.
    pub fn from_timeline(action: &TimelineAction) -> Option<Self> {
        match action {
            TimelineAction::DaoCreated => Some(Self::DaoCreated),
            TimelineAction::DaoUpdated => Some(Self::DaoUpdated),
            TimelineAction::ProposalCreated => Some(Self::ProposalCreated),
            TimelineAction::ProposalUpdated => Some(Self::ProposalUpdated),
            TimelineAction::ProposalVotingStartsSoon => Some(Self::ProposalVotingStartsSoon),
            TimelineAction::ProposalVotingStarted => Some(Self::ProposalVotingStarted),
            TimelineAction::ProposalVotingQuorumReached => Some(Self::ProposalVotingQuorumReached),
            TimelineAction::ProposalVotingEndsSoon => Some(Self::ProposalVotingEndsSoon),
            TimelineAction::ProposalVotingEnded => Some(Self::ProposalVotingEnded),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalTimelineEntry {
    pub created_at_ms: i64,
    pub action: ExternalAction,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalFeedPayload {
    pub id: Option<Uuid>,
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub discussion_id: String,
    #[serde(rename = "type")]
    pub item_type: ExternalFeedType,
    pub action: Option<ExternalAction>,
    pub snapshot: serde_json::Value,
    pub timeline: Vec<ExternalTimelineEntry>,
}

impl From<&FeedItem> for ExternalFeedPayload {
    fn from(item: &FeedItem) -> Self {
        Self {
            id: item.id,
            dao_id: item.dao_id,
            proposal_id: item.proposal_id.clone(),
            discussion_id: item.discussion_id.clone(),
            item_type: item.item_type.into(),
            action: ExternalAction::from_timeline(&item.action),
            snapshot: item.snapshot.clone(),
            timeline: external_timeline(item.timeline.entries()),
        }
    }
}

fn external_timeline(entries: &[TimelineEntry]) -> Vec<ExternalTimelineEntry> {
    entries
        .iter()
        .filter_map(|entry| {
            ExternalAction::from_timeline(&entry.action).map(|action| ExternalTimelineEntry {
                created_at_ms: entry.created_at_ms,
                action,
            })
        })
        .collect()
}
