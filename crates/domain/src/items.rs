use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timeline::{Timeline, TimelineAction};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedItemType {
    Dao,
    Proposal,
    Delegate,
}

impl FeedItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dao => "dao",
            Self::Proposal => "proposal",
            Self::Delegate => "delegate",
        }
    }
}

impl fmt::Display for FeedItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedItemType {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dao" => Ok(Self::Dao),
            "proposal" => Ok(Self::Proposal),
            "delegate" => Ok(Self::Delegate),
            _ => Err("unknown feed item type"),
        }
    }
}

/// Identity of a reconciled feed item. Delegate items have no natural key:
/// every delegate event is stored as a fresh row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedItemKey {
    pub dao_id: Uuid,
    pub proposal_id: String,
    pub item_type: FeedItemType,
}

impl fmt::Display for FeedItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.item_type, self.dao_id, self.proposal_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeedItem {
    /// Assigned by the store on first persistence.
    pub id: Option<Uuid>,
    pub dao_id: Uuid,
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub discussion_id: String,
    #[serde(rename = "type")]
    pub item_type: FeedItemType,
    #[serde(default)]
    pub action: TimelineAction,
    #[serde(default)]
    pub snapshot: serde_json::Value,
    #[serde(default)]
    pub timeline: Timeline,
    pub triggered_at_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl FeedItem {
    pub fn new(
        item_type: FeedItemType,
        dao_id: Uuid,
        proposal_id: impl Into<String>,
        snapshot: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            dao_id,
            proposal_id: proposal_id.into(),
            discussion_id: String::new(),
            item_type,
            action: TimelineAction::None,
            snapshot,
            timeline: Timeline::new(),
            triggered_at_ms: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    pub fn natural_key(&self) -> Option<FeedItemKey> {
        match self.item_type {
            FeedItemType::Delegate => None,
            item_type => Some(FeedItemKey {
                dao_id: self.dao_id,
                proposal_id: self.proposal_id.clone(),
                item_type,
            }),
        }
    }

    /// Sorts the timeline and re-derives `action` and `triggered_at_ms` from
    /// its last entry. An empty timeline keeps whatever was set explicitly.
    pub fn refresh_derived(&mut self) {
        self.timeline.sort();
        if let Some(last) = self.timeline.last_entry() {
            self.action = last.action.clone();
            self.triggered_at_ms = last.created_at_ms;
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedList {
    pub items: Vec<FeedItem>,
    pub total_count: u64,
}

impl FeedList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Page request for the changelog stream: items of the given DAOs and types
/// updated strictly after the watermark, oldest first.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangelogQuery {
    pub dao_ids: Vec<Uuid>,
    pub types: Vec<FeedItemType>,
    pub updated_after_ms: i64,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelineEntry;

    #[test]
    fn refresh_mirrors_last_timeline_entry() {
        let mut item = FeedItem::new(
            FeedItemType::Proposal,
            Uuid::new_v4(),
            "0xabc",
            serde_json::Value::Null,
        );
        item.timeline = Timeline::from_entries(vec![
            TimelineEntry::new(300, TimelineAction::ProposalVotingEnded),
            TimelineEntry::new(100, TimelineAction::ProposalCreated),
        ]);
        item.refresh_derived();

        assert_eq!(item.action, TimelineAction::ProposalVotingEnded);
        assert_eq!(item.triggered_at_ms, 300);
        assert_eq!(
            item.timeline.entries()[0].action,
            TimelineAction::ProposalCreated
        );
    }

    #[test]
    fn delegate_items_have_no_natural_key() {
        let dao_id = Uuid::new_v4();
        let delegate = FeedItem::new(FeedItemType::Delegate, dao_id, "p1", serde_json::Value::Null);
        assert!(delegate.natural_key().is_none());

        let proposal = FeedItem::new(FeedItemType::Proposal, dao_id, "p1", serde_json::Value::Null);
        assert_eq!(
            proposal.natural_key().map(|key| key.to_string()),
            Some(format!("proposal:{dao_id}:p1"))
        );
    }

    #[test]
    fn parses_item_type() {
        assert_eq!("Proposal".parse::<FeedItemType>(), Ok(FeedItemType::Proposal));
        assert!("vote".parse::<FeedItemType>().is_err());
    }
}
