use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle tag attached to a timeline entry.
///
/// Tags compare case-insensitively. Unknown tags are preserved verbatim in
/// [`TimelineAction::Other`] so producers can introduce new milestones
/// without breaking persisted timelines.
#[derive(Clone, Debug, Default, Eq)]
pub enum TimelineAction {
    #[default]
    None,
    DaoCreated,
    DaoUpdated,
    ProposalCreated,
    ProposalUpdated,
    ProposalVotingStartsSoon,
    ProposalVotingStarted,
    ProposalVotingQuorumReached,
    ProposalVotingEndsSoon,
    ProposalVotingEnded,
    DelegateCreated,
    DelegateCreateProposal,
    DelegateVotingVoted,
    DelegateVotingSkipVote,
    Other(String),
}

impl TimelineAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "",
            Self::DaoCreated => "dao.created",
            Self::DaoUpdated => "dao.updated",
            Self::ProposalCreated => "proposal.created",
            Self::ProposalUpdated => "proposal.updated",
            Self::ProposalVotingStartsSoon => "proposal.voting.starts_soon",
            Self::ProposalVotingStarted => "proposal.voting.started",
            Self::ProposalVotingQuorumReached => "proposal.voting.quorum_reached",
            Self::ProposalVotingEndsSoon => "proposal.voting.ends_soon",
            Self::ProposalVotingEnded => "proposal.voting.ended",
            Self::DelegateCreated => "delegate.created",
            Self::DelegateCreateProposal => "delegate.proposal.created",
            Self::DelegateVotingVoted => "delegate.voting.voted",
            Self::DelegateVotingSkipVote => "delegate.voting.skip_vote",
            Self::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" => Self::None,
            "dao.created" => Self::DaoCreated,
            "dao.updated" => Self::DaoUpdated,
            "proposal.created" => Self::ProposalCreated,
            "proposal.updated" => Self::ProposalUpdated,
            "proposal.voting.starts_soon" => Self::ProposalVotingStartsSoon,
            "proposal.voting.started" => Self::ProposalVotingStarted,
            "proposal.voting.quorum_reached" => Self::ProposalVotingQuorumReached,
            "proposal.voting.ends_soon" => Self::ProposalVotingEndsSoon,
            "proposal.voting.ended" => Self::ProposalVotingEnded,
            "delegate.created" => Self::DelegateCreated,
            "delegate.proposal.created" => Self::DelegateCreateProposal,
            "delegate.voting.voted" => Self::DelegateVotingVoted,
            "delegate.voting.skip_vote" => Self::DelegateVotingSkipVote,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl PartialEq for TimelineAction {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl std::hash::Hash for TimelineAction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for TimelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimelineAction {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(value))
    }
}

impl Serialize for TimelineAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TimelineAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub created_at_ms: i64,
    pub action: TimelineAction,
}

impl TimelineEntry {
    pub fn new(created_at_ms: i64, action: TimelineAction) -> Self {
        Self {
            created_at_ms,
            action,
        }
    }
}

/// Ordered lifecycle history of a feed item.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Timeline(Vec<TimelineEntry>);

impl Timeline {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_entries(entries: Vec<TimelineEntry>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.0
    }

    pub fn into_entries(self) -> Vec<TimelineEntry> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_action(&self, action: &TimelineAction) -> bool {
        self.0.iter().any(|entry| &entry.action == action)
    }

    /// Appends unless an entry with the same tag exists. Returns whether the
    /// timeline changed.
    pub fn add_unique_action(&mut self, created_at_ms: i64, action: TimelineAction) -> bool {
        if self.contains_action(&action) {
            return false;
        }
        self.0.push(TimelineEntry::new(created_at_ms, action));
        true
    }

    pub fn add_non_unique_action(&mut self, created_at_ms: i64, action: TimelineAction) {
        self.0.push(TimelineEntry::new(created_at_ms, action));
    }

    /// Inserts `entries` ahead of the existing ones. Callers sort afterwards.
    pub fn prepend(&mut self, entries: Vec<TimelineEntry>) {
        if entries.is_empty() {
            return;
        }
        let existing = std::mem::replace(&mut self.0, entries);
        self.0.extend(existing);
    }

    /// Stable ascending sort by timestamp; equal timestamps keep insertion order.
    pub fn sort(&mut self) {
        self.0.sort_by_key(|entry| entry.created_at_ms);
    }

    pub fn last_entry(&self) -> Option<&TimelineEntry> {
        self.0.last()
    }

    pub fn last_action(&self) -> TimelineAction {
        self.0
            .last()
            .map(|entry| entry.action.clone())
            .unwrap_or_default()
    }
}
