use crate::events::{ProposalPayload, ProposalSubject};
use crate::items::{FeedItem, FeedItemType};
use crate::timeline::{Timeline, TimelineAction, TimelineEntry};
use crate::util::unix_seconds_to_ms;

use super::{EventClassification, EventTime, MergeOutcome, apply_classification};

pub fn classify_proposal_event(subject: &str) -> EventClassification {
    use EventClassification as C;

    match ProposalSubject::parse(subject) {
        Some(ProposalSubject::Created) => {
            C::unique(TimelineAction::ProposalCreated, EventTime::PayloadCreated)
        }
        Some(ProposalSubject::VotingStarted) => {
            C::unique(TimelineAction::ProposalVotingStarted, EventTime::VoteStart)
        }
        Some(ProposalSubject::VotingEnded) => {
            C::unique(TimelineAction::ProposalVotingEnded, EventTime::VoteEnd)
        }
        Some(ProposalSubject::VotingStartsSoon) => {
            C::unique(TimelineAction::ProposalVotingStartsSoon, EventTime::WallClock)
        }
        Some(ProposalSubject::VotingEndsSoon) => {
            C::unique(TimelineAction::ProposalVotingEndsSoon, EventTime::WallClock)
        }
        Some(ProposalSubject::VotingQuorumReached) => {
            C::unique(TimelineAction::ProposalVotingQuorumReached, EventTime::WallClock)
        }
        Some(ProposalSubject::Updated) | Some(ProposalSubject::UpdatedState) | None => {
            C::repeatable(TimelineAction::ProposalUpdated)
        }
    }
}

/// Merges a proposal event into the stored item. The snapshot always takes
/// the latest payload.
pub fn merge_proposal_event(
    existing: Option<FeedItem>,
    subject: &str,
    payload: &ProposalPayload,
    snapshot: serde_json::Value,
    now_ms: i64,
) -> MergeOutcome {
    let mut item = existing.unwrap_or_else(|| {
        FeedItem::new(
            FeedItemType::Proposal,
            payload.dao_id,
            payload.id.clone(),
            serde_json::Value::Null,
        )
    });
    item.snapshot = snapshot;

    let classification = classify_proposal_event(subject);
    let event_time_ms = match classification.time {
        EventTime::WallClock => now_ms,
        EventTime::PayloadCreated => unix_seconds_to_ms(payload.created),
        EventTime::VoteStart => unix_seconds_to_ms(payload.start),
        EventTime::VoteEnd => unix_seconds_to_ms(payload.end),
    };
    let send_updates = apply_classification(&mut item.timeline, &classification, event_time_ms);

    prefill_timeline(&mut item.timeline, payload, now_ms);
    item.refresh_derived();

    MergeOutcome { item, send_updates }
}

/// Synthesizes milestones implied by the payload but never observed:
/// creation always, vote start and end once they are in the past.
fn prefill_timeline(timeline: &mut Timeline, payload: &ProposalPayload, now_ms: i64) {
    let mut missing = Vec::with_capacity(3);

    if !timeline.contains_action(&TimelineAction::ProposalCreated) {
        missing.push(TimelineEntry::new(
            unix_seconds_to_ms(payload.created),
            TimelineAction::ProposalCreated,
        ));
    }

    let starts_at_ms = unix_seconds_to_ms(payload.start);
    if starts_at_ms < now_ms && !timeline.contains_action(&TimelineAction::ProposalVotingStarted) {
        missing.push(TimelineEntry::new(
            starts_at_ms,
            TimelineAction::ProposalVotingStarted,
        ));
    }

    let ends_at_ms = unix_seconds_to_ms(payload.end);
    if ends_at_ms < now_ms && !timeline.contains_action(&TimelineAction::ProposalVotingEnded) {
        missing.push(TimelineEntry::new(ends_at_ms, TimelineAction::ProposalVotingEnded));
    }

    timeline.prepend(missing);
}
