use crate::events::{DaoPayload, DaoSubject};
use crate::items::{FeedItem, FeedItemType};
use crate::timeline::{TimelineAction, TimelineEntry};

use super::{EventClassification, EventTime, MergeOutcome, apply_classification};

pub fn classify_dao_event(subject: &str) -> EventClassification {
    match DaoSubject::parse(subject) {
        Some(DaoSubject::Created) => {
            EventClassification::unique(TimelineAction::DaoCreated, EventTime::PayloadCreated)
        }
        Some(DaoSubject::Updated) | None => {
            EventClassification::repeatable(TimelineAction::DaoUpdated)
        }
    }
}

/// Merges a DAO event into the stored item. The stored snapshot is kept on
/// updates; only a new item takes the payload as its snapshot.
pub fn merge_dao_event(
    existing: Option<FeedItem>,
    subject: &str,
    payload: &DaoPayload,
    snapshot: serde_json::Value,
    now_ms: i64,
) -> MergeOutcome {
    let mut item = existing
        .unwrap_or_else(|| FeedItem::new(FeedItemType::Dao, payload.id, "", snapshot));

    let classification = classify_dao_event(subject);
    let created_ms = payload.created_at_ms().unwrap_or(now_ms);
    let event_time_ms = match classification.time {
        EventTime::PayloadCreated => created_ms,
        _ => now_ms,
    };
    let send_updates = apply_classification(&mut item.timeline, &classification, event_time_ms);

    if !item.timeline.contains_action(&TimelineAction::DaoCreated) {
        item.timeline
            .prepend(vec![TimelineEntry::new(created_ms, TimelineAction::DaoCreated)]);
    }
    item.refresh_derived();

    MergeOutcome { item, send_updates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const T0: i64 = 1_704_067_200_000;

    fn payload() -> (DaoPayload, serde_json::Value) {
        let snapshot = json!({
            "id": Uuid::new_v4(),
            "alias": "aave.eth",
            "name": "Aave",
            "created_at": "2024-01-01T00:00:00Z"
        });
        let payload = serde_json::from_value(snapshot.clone()).expect("payload");
        (payload, snapshot)
    }

    #[test]
    fn unknown_subject_is_repeatable_update() {
        let classification = classify_dao_event("core.dao.renamed");
        assert_eq!(classification.action, TimelineAction::DaoUpdated);
        assert!(!classification.is_unique);
    }

    #[test]
    fn created_then_duplicate_then_update() {
        let (payload, snapshot) = payload();

        let first = merge_dao_event(None, "core.dao.created", &payload, snapshot.clone(), T0 + 5);
        assert!(first.send_updates);
        assert_eq!(first.item.timeline.len(), 1);
        assert_eq!(first.item.triggered_at_ms, T0);

        let duplicate = merge_dao_event(
            Some(first.item.clone()),
            "core.dao.created",
            &payload,
            snapshot.clone(),
            T0 + 10,
        );
        assert!(!duplicate.send_updates);
        assert_eq!(duplicate.item.timeline, first.item.timeline);

        let updated = merge_dao_event(
            Some(duplicate.item),
            "core.dao.updated",
            &payload,
            snapshot,
            T0 + 20,
        );
        assert!(updated.send_updates);
        assert_eq!(updated.item.timeline.len(), 2);
        assert_eq!(updated.item.action, TimelineAction::DaoUpdated);
        assert_eq!(updated.item.triggered_at_ms, T0 + 20);
    }

    #[test]
    fn update_before_create_prefills_creation() {
        let (payload, snapshot) = payload();

        let outcome = merge_dao_event(None, "core.dao.updated", &payload, snapshot, T0 + 50);

        let entries = outcome.item.timeline.entries();
        assert_eq!(entries[0], TimelineEntry::new(T0, TimelineAction::DaoCreated));
        assert_eq!(entries[1], TimelineEntry::new(T0 + 50, TimelineAction::DaoUpdated));
        assert_eq!(outcome.item.action, TimelineAction::DaoUpdated);
    }

    #[test]
    fn keeps_stored_snapshot_on_merge() {
        let (payload, snapshot) = payload();
        let first = merge_dao_event(None, "core.dao.created", &payload, snapshot, T0);

        let merged = merge_dao_event(
            Some(first.item.clone()),
            "core.dao.updated",
            &payload,
            json!({ "name": "renamed" }),
            T0 + 1,
        );

        assert_eq!(merged.item.snapshot, first.item.snapshot);
    }

    #[test]
    fn missing_creation_time_falls_back_to_wall_clock() {
        let dao_id = Uuid::new_v4();
        let snapshot = json!({ "id": dao_id });
        let payload: DaoPayload = serde_json::from_value(snapshot.clone()).expect("payload");

        let outcome = merge_dao_event(None, "core.dao.created", &payload, snapshot, 42);
        assert_eq!(outcome.item.triggered_at_ms, 42);
        assert_eq!(outcome.item.dao_id, dao_id);
    }
}
