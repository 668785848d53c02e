//! C12 — Feedback Sink (§4.12).
//!
//! Validates that the target Event exists and its current status permits
//! the requested action, persists the `FeedbackEvent`, and returns the
//! follow-up effect the caller (API layer + organizer + state machine) must
//! carry out. This module makes no database or broadcast calls itself —
//! grounded on the teacher's `api/` pattern of thin handlers delegating to
//! pure decision functions plus a `State<AppState>` for persistence.

use crate::model::{EventId, EventStatus, FeedbackAction, FeedbackEvent};
use crate::state_machine::{self, Action, Trigger};
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEffect {
    Transition(Trigger),
    CanonicalizeInto { target_event_id: EventId },
    SplitIntoNewEvent { doc_ids: Vec<uuid::Uuid> },
    /// PAUTAR/NOT_NEWS carry no state transition of their own; they are
    /// editorial annotations the UI reads back from `FeedbackEvent` history.
    NoTransition,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackRejection {
    #[error("event {0} does not exist")]
    EventNotFound(EventId),
    #[error("action not permitted in current event state")]
    ActionNotPermitted,
    #[error("MERGE payload must name a target event_id")]
    MissingMergeTarget,
    #[error("SPLIT payload must name at least one document id")]
    EmptySplitPayload,
}

fn action_gate(action: FeedbackAction) -> Action {
    match action {
        FeedbackAction::Ignore => Action::Ignore,
        FeedbackAction::Snooze => Action::Snooze,
        FeedbackAction::Pautar => Action::DispatchVerifiedDraft,
        FeedbackAction::Merge => Action::ManualMerge,
        // SPLIT and NOT_NEWS are always permitted editorial annotations;
        // they don't map onto an action-gated UI affordance (§4.8 lists
        // gating only for the dispatch/merge family).
        FeedbackAction::Split | FeedbackAction::NotNews => Action::Monitor,
    }
}

/// Validates `action` against `current_status` and, if permitted, returns
/// the effect the caller must now carry out (§4.12). Does not itself check
/// Event existence — that is a storage-layer lookup the caller performs
/// before calling this.
pub fn handle(
    event_id: EventId,
    current_status: EventStatus,
    action: FeedbackAction,
    payload: &serde_json::Value,
) -> Result<(FeedbackEvent, FeedbackEffect), FeedbackRejection> {
    if action != FeedbackAction::Split && action != FeedbackAction::NotNews {
        let gate = action_gate(action);
        if !state_machine::is_action_permitted(current_status, gate) {
            return Err(FeedbackRejection::ActionNotPermitted);
        }
    }

    let effect = match action {
        FeedbackAction::Ignore => FeedbackEffect::Transition(Trigger::EditorialIgnore),
        FeedbackAction::Snooze => FeedbackEffect::NoTransition,
        FeedbackAction::Pautar => FeedbackEffect::NoTransition,
        FeedbackAction::Merge => {
            let target_event_id = payload
                .get("target_event_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or(FeedbackRejection::MissingMergeTarget)?;
            FeedbackEffect::CanonicalizeInto { target_event_id }
        }
        FeedbackAction::Split => {
            let doc_ids: Vec<Uuid> = payload
                .get("doc_ids")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(|s| Uuid::parse_str(s).ok())
                        .collect()
                })
                .unwrap_or_default();
            if doc_ids.is_empty() {
                return Err(FeedbackRejection::EmptySplitPayload);
            }
            FeedbackEffect::SplitIntoNewEvent { doc_ids }
        }
        FeedbackAction::NotNews => FeedbackEffect::NoTransition,
    };

    let feedback = FeedbackEvent {
        feedback_id: Uuid::new_v4(),
        event_id,
        action,
        payload: payload.clone(),
        received_at: Utc::now(),
    };

    Ok((feedback, effect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ignore_is_permitted_from_hydrating_and_produces_transition() {
        let event_id = Uuid::new_v4();
        let (feedback, effect) = handle(event_id, EventStatus::Hydrating, FeedbackAction::Ignore, &json!({})).unwrap();
        assert_eq!(feedback.action, FeedbackAction::Ignore);
        assert_eq!(effect, FeedbackEffect::Transition(Trigger::EditorialIgnore));
    }

    #[test]
    fn pautar_is_rejected_from_hydrating() {
        let event_id = Uuid::new_v4();
        let result = handle(event_id, EventStatus::Hydrating, FeedbackAction::Pautar, &json!({}));
        assert_eq!(result.unwrap_err(), FeedbackRejection::ActionNotPermitted);
    }

    #[test]
    fn pautar_is_permitted_from_hot() {
        let event_id = Uuid::new_v4();
        let result = handle(event_id, EventStatus::Hot, FeedbackAction::Pautar, &json!({}));
        assert!(result.is_ok());
    }

    #[test]
    fn merge_requires_target_event_id_in_payload() {
        let event_id = Uuid::new_v4();
        let result = handle(event_id, EventStatus::Hot, FeedbackAction::Merge, &json!({}));
        assert_eq!(result.unwrap_err(), FeedbackRejection::MissingMergeTarget);
    }

    #[test]
    fn merge_with_valid_target_resolves_to_canonicalize_effect() {
        let event_id = Uuid::new_v4();
        let target = Uuid::new_v4();
        let (_, effect) = handle(
            event_id,
            EventStatus::Hot,
            FeedbackAction::Merge,
            &json!({ "target_event_id": target.to_string() }),
        )
        .unwrap();
        assert_eq!(effect, FeedbackEffect::CanonicalizeInto { target_event_id: target });
    }

    #[test]
    fn split_requires_at_least_one_document_id() {
        let event_id = Uuid::new_v4();
        let result = handle(event_id, EventStatus::Hot, FeedbackAction::Split, &json!({ "doc_ids": [] }));
        assert_eq!(result.unwrap_err(), FeedbackRejection::EmptySplitPayload);
    }

    #[test]
    fn merge_is_rejected_from_hydrating_state() {
        let event_id = Uuid::new_v4();
        let target = Uuid::new_v4();
        let result = handle(
            event_id,
            EventStatus::Hydrating,
            FeedbackAction::Merge,
            &json!({ "target_event_id": target.to_string() }),
        );
        assert_eq!(result.unwrap_err(), FeedbackRejection::ActionNotPermitted);
    }
}
