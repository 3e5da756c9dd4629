use crate::events::{DelegatePayload, DelegateSubject};
use crate::items::{FeedItem, FeedItemType};
use crate::timeline::TimelineAction;

use super::MergeOutcome;

pub fn delegate_action(subject: &str) -> TimelineAction {
    match DelegateSubject::parse(subject) {
        Some(DelegateSubject::Created) => TimelineAction::DelegateCreated,
        Some(DelegateSubject::CreateProposal) => TimelineAction::DelegateCreateProposal,
        Some(DelegateSubject::VotingVoted) => TimelineAction::DelegateVotingVoted,
        Some(DelegateSubject::VotingSkipVote) => TimelineAction::DelegateVotingSkipVote,
        None => TimelineAction::None,
    }
}

/// Delegate events are never merged: each one becomes its own item and is
/// always fanned out.
pub fn build_delegate_item(
    subject: &str,
    payload: &DelegatePayload,
    snapshot: serde_json::Value,
    now_ms: i64,
) -> MergeOutcome {
    let mut item = FeedItem::new(
        FeedItemType::Delegate,
        payload.dao_id,
        payload.proposal_id.clone(),
        snapshot,
    );

    let action = delegate_action(subject);
    if !action.is_none() {
        item.timeline.add_non_unique_action(now_ms, action);
    }
    item.triggered_at_ms = now_ms;
    item.refresh_derived();

    MergeOutcome {
        item,
        send_updates: true,
    }
}
