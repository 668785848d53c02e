//! Deferred canonical merge (§4.6 `DEFER_MERGE`).
//!
//! Pure selection logic, independent of storage: given a group of Events
//! that share a strong anchor pair, pick the canonical Event and describe
//! the re-homing/audit that follows. The actual DB writes (re-homing
//! `EventDoc` edges, appending `MergeAudit`, recomputing scores, emitting
//! `EVENT_MERGED`) are performed by the caller using this decision.

use crate::model::{AnchorType, EventId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct EventMergeCandidate {
    pub event_id: EventId,
    pub first_seen_at: DateTime<Utc>,
    pub anchor_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub canonical_event_id: EventId,
    pub followers: Vec<EventId>,
}

/// Resolves a one-step pointer chain to its ultimate canonical id, so
/// merges never chain (§9 "resolve the target through its own pointer
/// before pointing").
pub fn resolve_canonical(
    event_id: EventId,
    pointer_of: &dyn Fn(EventId) -> Option<EventId>,
) -> EventId {
    let mut current = event_id;
    // A real chain is at most one hop by invariant #2; this loop just
    // tolerates a transiently-unflattened chain rather than assuming it.
    let mut hops = 0;
    while let Some(next) = pointer_of(current) {
        current = next;
        hops += 1;
        if hops > 32 {
            break;
        }
    }
    current
}

/// Picks the canonical Event among a cluster sharing a strong anchor pair:
/// earliest `first_seen_at`, then highest anchor count (§4.6).
pub fn plan_merge(candidates: &[EventMergeCandidate]) -> Option<MergePlan> {
    if candidates.len() < 2 {
        return None;
    }
    let canonical = candidates
        .iter()
        .min_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| b.anchor_count.cmp(&a.anchor_count))
        })
        .expect("non-empty checked above");

    let followers = candidates
        .iter()
        .filter(|c| c.event_id != canonical.event_id)
        .map(|c| c.event_id)
        .collect();

    Some(MergePlan {
        canonical_event_id: canonical.event_id,
        followers,
    })
}

#[derive(Debug, Clone)]
pub struct MergeAuditRecord {
    pub from_event_id: EventId,
    pub to_event_id: EventId,
    pub reason_code: &'static str,
    pub evidence_anchor: (AnchorType, String),
}

pub const REASON_DEFERRED_ANCHOR_MERGE: &str = "DEFERRED_ANCHOR_MERGE";

pub fn build_audits(
    plan: &MergePlan,
    evidence_anchor: (AnchorType, String),
) -> Vec<MergeAuditRecord> {
    plan.followers
        .iter()
        .map(|&from| MergeAuditRecord {
            from_event_id: from,
            to_event_id: plan.canonical_event_id,
            reason_code: REASON_DEFERRED_ANCHOR_MERGE,
            evidence_anchor: evidence_anchor.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(id: EventId, seconds_ago: i64, anchor_count: u32) -> EventMergeCandidate {
        EventMergeCandidate {
            event_id: id,
            first_seen_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
            anchor_count,
        }
    }

    #[test]
    fn earliest_event_becomes_canonical() {
        let e1 = Uuid::new_v4();
        let e2 = Uuid::new_v4();
        let plan = plan_merge(&[candidate(e1, 300, 2), candidate(e2, 60, 5)]).unwrap();
        assert_eq!(plan.canonical_event_id, e1);
        assert_eq!(plan.followers, vec![e2]);
    }

    #[test]
    fn ties_in_first_seen_break_on_anchor_count() {
        let t = Utc::now();
        let e1 = Uuid::new_v4();
        let e2 = Uuid::new_v4();
        let plan = plan_merge(&[
            EventMergeCandidate { event_id: e1, first_seen_at: t, anchor_count: 1 },
            EventMergeCandidate { event_id: e2, first_seen_at: t, anchor_count: 9 },
        ])
        .unwrap();
        assert_eq!(plan.canonical_event_id, e2);
    }

    #[test]
    fn single_event_produces_no_plan() {
        let e1 = Uuid::new_v4();
        assert!(plan_merge(&[candidate(e1, 0, 1)]).is_none());
    }

    #[test]
    fn pointer_resolution_follows_single_hop() {
        let canonical = Uuid::new_v4();
        let follower = Uuid::new_v4();
        let pointer_of = |id: EventId| if id == follower { Some(canonical) } else { None };
        assert_eq!(resolve_canonical(follower, &pointer_of), canonical);
        assert_eq!(resolve_canonical(canonical, &pointer_of), canonical);
    }

    #[test]
    fn idempotent_merge_produces_no_audit_rows_on_second_call() {
        let e1 = Uuid::new_v4();
        let e2 = Uuid::new_v4();
        let plan = plan_merge(&[candidate(e1, 300, 2), candidate(e2, 60, 5)]).unwrap();
        let audits = build_audits(&plan, (AnchorType::Pl, "1234/2025".to_string()));
        assert_eq!(audits.len(), 1);

        // A second merge attempt between an already-canonical pair and
        // itself alone yields no plan at all (§8 "MERGE(A,B) followed by
        // MERGE(A,B) is idempotent").
        assert!(plan_merge(&[candidate(e1, 300, 2)]).is_none());
    }
}
