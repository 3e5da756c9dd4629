//! Bus subjects and payload shapes exchanged with the governance core.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::timeline::TimelineEntry;
use crate::util::datetime_to_ms;

pub const SUBJECT_CALLBACK: &str = "core.callback";
pub const SUBJECT_TIMELINE_UPDATE: &str = "core.timeline.update";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaoSubject {
    Created,
    Updated,
}

impl DaoSubject {
    pub const ALL: [DaoSubject; 2] = [Self::Created, Self::Updated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "core.dao.created",
            Self::Updated => "core.dao.updated",
        }
    }

    pub fn parse(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|value| value.as_str() == subject)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalSubject {
    Created,
    Updated,
    UpdatedState,
    VotingStartsSoon,
    VotingStarted,
    VotingQuorumReached,
    VotingEndsSoon,
    VotingEnded,
}

impl ProposalSubject {
    pub const ALL: [ProposalSubject; 8] = [
        Self::Created,
        Self::Updated,
        Self::UpdatedState,
        Self::VotingStartsSoon,
        Self::VotingStarted,
        Self::VotingQuorumReached,
        Self::VotingEndsSoon,
        Self::VotingEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "core.proposal.created",
            Self::Updated => "core.proposal.updated",
            Self::UpdatedState => "core.proposal.updated.state",
            Self::VotingStartsSoon => "core.proposal.voting.starts_soon",
            Self::VotingStarted => "core.proposal.voting.started",
            Self::VotingQuorumReached => "core.proposal.voting.quorum_reached",
            Self::VotingEndsSoon => "core.proposal.voting.ends_soon",
            Self::VotingEnded => "core.proposal.voting.ended",
        }
    }

    pub fn parse(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|value| value.as_str() == subject)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegateSubject {
    Created,
    CreateProposal,
    VotingVoted,
    VotingSkipVote,
}

impl DelegateSubject {
    pub const ALL: [DelegateSubject; 4] = [
        Self::Created,
        Self::CreateProposal,
        Self::VotingVoted,
        Self::VotingSkipVote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "core.delegate.created",
            Self::CreateProposal => "core.delegate.create_proposal",
            Self::VotingVoted => "core.delegate.voting.voted",
            Self::VotingSkipVote => "core.delegate.voting.skip_vote",
        }
    }

    pub fn parse(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|value| value.as_str() == subject)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DaoPayload {
    pub id: Uuid,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub popularity_index: f64,
    #[serde(default)]
    pub verified: bool,
}

impl DaoPayload {
    pub fn created_at_ms(&self) -> Option<i64> {
        self.created_at.map(datetime_to_ms)
    }
}

/// Vote boundaries and creation time are unix seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProposalPayload {
    pub id: String,
    pub dao_id: Uuid,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub spam: bool,
    #[serde(default, rename = "type")]
    pub proposal_type: String,
    #[serde(default)]
    pub privacy: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DelegatePayload {
    pub dao_id: Uuid,
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub initiator: String,
    #[serde(default)]
    pub delegator: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
}

/// Outbound request for the webhook delivery service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub webhook_url: String,
    pub body: serde_json::Value,
}

/// Broadcast to the governance core whenever an item's timeline changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimelineUpdatePayload {
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub discussion_id: String,
    pub timeline: Vec<TimelineEntry>,
}
