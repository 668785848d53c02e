//! C8 — Event state machine (§4.8).
//!
//! Pure transition logic: given an Event's current status/flags and a
//! `Trigger`, decides the next status (if any). Gating timeouts are
//! measured from Event creation and are independent of transport timeouts
//! (§4.8 "Timeout enforcement is a separate concern from end-to-end SLOs").

use crate::model::{EventFlag, EventStatus};
use chrono::Duration;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    FastGateTimeoutNoStrongEvidence,
    RenderGateTimeoutNoStrongEvidence,
    ScoreCrossedHotThreshold { has_strong_anchor_or_tier1: bool },
    ContradictoryEvidenceOrBlacklist,
    QuarantineTtlElapsed,
    EditorialIgnore,
    Canonicalized,
    InactivityBeyondHorizon,
    EnrichmentPoolsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenSource,
    CopyLink,
    Monitor,
    Snooze,
    Ignore,
    DispatchVerifiedDraft,
    DispatchUnverifiedDraft,
    ManualMerge,
}

fn is_terminal(status: EventStatus) -> bool {
    matches!(
        status,
        EventStatus::Merged | EventStatus::Ignored | EventStatus::Expired | EventStatus::FailedEnrich
    )
}

/// Applies `trigger` to `current`, returning the new status if the
/// transition table (§4.8) permits it from this state.
pub fn transition(current: EventStatus, trigger: Trigger) -> Option<EventStatus> {
    use EventStatus::*;
    use Trigger::*;

    // MERGED is reachable from any status, terminal or not (§4.8 "any -> MERGED").
    if trigger == Canonicalized {
        return if current == Merged { None } else { Some(Merged) };
    }

    match (current, trigger) {
        (Hydrating, FastGateTimeoutNoStrongEvidence) => Some(PartialEnrich),
        (Hydrating, RenderGateTimeoutNoStrongEvidence) => Some(PartialEnrich),

        (Hydrating | PartialEnrich, ScoreCrossedHotThreshold { has_strong_anchor_or_tier1: true }) => Some(Hot),

        (_, ContradictoryEvidenceOrBlacklist) if !is_terminal(current) => Some(Quarantine),

        (Quarantine, QuarantineTtlElapsed) => Some(Expired),

        (_, EditorialIgnore) if !is_terminal(current) => Some(Ignored),

        (Hot | PartialEnrich, InactivityBeyondHorizon) => Some(Expired),

        (_, EnrichmentPoolsExhausted) if current != FailedEnrich => Some(FailedEnrich),

        _ => None,
    }
}

/// Whether `flags` should gain/keep `UNVERIFIED_VIRAL` given the inputs that
/// drive the override (§4.8): extreme velocity *and* (high tier *or* high
/// source diversity *or* minimal evidence).
pub fn should_flag_unverified_viral(
    velocity_extreme: bool,
    high_tier: bool,
    high_source_diversity: bool,
    minimal_evidence: bool,
) -> bool {
    velocity_extreme && (high_tier || high_source_diversity || minimal_evidence)
}

pub fn apply_unverified_viral(flags: &mut HashSet<EventFlag>, should_flag: bool) {
    if should_flag {
        flags.insert(EventFlag::UnverifiedViral);
    } else {
        flags.remove(&EventFlag::UnverifiedViral);
    }
}

/// Action gating per current status (§4.8).
pub fn allowed_actions(status: EventStatus) -> &'static [Action] {
    use Action::*;
    match status {
        EventStatus::Hydrating => &[OpenSource, CopyLink, Monitor, Snooze, Ignore],
        EventStatus::PartialEnrich => &[
            OpenSource,
            CopyLink,
            Monitor,
            Snooze,
            Ignore,
            DispatchUnverifiedDraft,
        ],
        EventStatus::Hot | EventStatus::Quarantine => &[
            OpenSource,
            CopyLink,
            Monitor,
            Snooze,
            Ignore,
            DispatchVerifiedDraft,
            DispatchUnverifiedDraft,
            ManualMerge,
        ],
        EventStatus::Merged | EventStatus::Ignored | EventStatus::Expired | EventStatus::FailedEnrich => {
            &[OpenSource, CopyLink]
        }
        EventStatus::New => &[OpenSource, CopyLink, Monitor],
    }
}

pub fn is_action_permitted(status: EventStatus, action: Action) -> bool {
    allowed_actions(status).contains(&action)
}

/// Elapsed time since Event creation at which the fast-path gate fires
/// without strong evidence (§4.8, default 15s from config).
pub fn fast_gate_elapsed(age: Duration, fast_gate_timeout: Duration) -> bool {
    age >= fast_gate_timeout
}

pub fn render_gate_elapsed(age: Duration, render_gate_timeout: Duration) -> bool {
    age >= render_gate_timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventStatus::*;

    #[test]
    fn hydrating_moves_to_partial_enrich_on_fast_gate_timeout() {
        assert_eq!(
            transition(Hydrating, Trigger::FastGateTimeoutNoStrongEvidence),
            Some(PartialEnrich)
        );
    }

    #[test]
    fn partial_enrich_moves_to_hot_only_with_strong_anchor_or_tier1() {
        assert_eq!(
            transition(
                PartialEnrich,
                Trigger::ScoreCrossedHotThreshold { has_strong_anchor_or_tier1: true }
            ),
            Some(Hot)
        );
        assert_eq!(
            transition(
                PartialEnrich,
                Trigger::ScoreCrossedHotThreshold { has_strong_anchor_or_tier1: false }
            ),
            None
        );
    }

    #[test]
    fn any_non_terminal_quarantines_on_contradictory_evidence() {
        assert_eq!(transition(Hot, Trigger::ContradictoryEvidenceOrBlacklist), Some(Quarantine));
        assert_eq!(transition(Merged, Trigger::ContradictoryEvidenceOrBlacklist), None);
    }

    #[test]
    fn quarantine_expires_on_ttl_but_not_before() {
        assert_eq!(transition(Quarantine, Trigger::QuarantineTtlElapsed), Some(Expired));
        assert_eq!(transition(Hot, Trigger::QuarantineTtlElapsed), None);
    }

    #[test]
    fn editorial_ignore_reaches_ignored_from_any_non_terminal_state() {
        assert_eq!(transition(New, Trigger::EditorialIgnore), Some(Ignored));
        assert_eq!(transition(Expired, Trigger::EditorialIgnore), None);
    }

    #[test]
    fn canonicalization_merges_from_any_state_including_terminal() {
        assert_eq!(transition(Hot, Trigger::Canonicalized), Some(Merged));
        assert_eq!(transition(Expired, Trigger::Canonicalized), Some(Merged));
        assert_eq!(transition(Merged, Trigger::Canonicalized), None);
    }

    #[test]
    fn inactivity_expires_only_from_hot_or_partial_enrich() {
        assert_eq!(transition(Hot, Trigger::InactivityBeyondHorizon), Some(Expired));
        assert_eq!(transition(PartialEnrich, Trigger::InactivityBeyondHorizon), Some(Expired));
        assert_eq!(transition(Hydrating, Trigger::InactivityBeyondHorizon), None);
    }

    #[test]
    fn failed_enrich_is_terminal_and_not_re_triggerable() {
        assert_eq!(transition(Hydrating, Trigger::EnrichmentPoolsExhausted), Some(FailedEnrich));
        assert_eq!(transition(FailedEnrich, Trigger::EnrichmentPoolsExhausted), None);
    }

    #[test]
    fn action_gating_matches_hydrating_and_partial_enrich_rules() {
        assert!(is_action_permitted(Hydrating, Action::Monitor));
        assert!(!is_action_permitted(Hydrating, Action::DispatchVerifiedDraft));
        assert!(!is_action_permitted(Hydrating, Action::ManualMerge));
        assert!(is_action_permitted(PartialEnrich, Action::DispatchUnverifiedDraft));
        assert!(!is_action_permitted(PartialEnrich, Action::DispatchVerifiedDraft));
    }

    #[test]
    fn unverified_viral_requires_extreme_velocity_and_one_corroborating_factor() {
        assert!(should_flag_unverified_viral(true, true, false, false));
        assert!(should_flag_unverified_viral(true, false, true, false));
        assert!(should_flag_unverified_viral(true, false, false, true));
        assert!(!should_flag_unverified_viral(true, false, false, false));
        assert!(!should_flag_unverified_viral(false, true, true, true));
    }

    #[test]
    fn gate_timeout_helpers_compare_against_configured_thresholds() {
        assert!(fast_gate_elapsed(Duration::seconds(16), Duration::seconds(15)));
        assert!(!fast_gate_elapsed(Duration::seconds(14), Duration::seconds(15)));
        assert!(render_gate_elapsed(Duration::seconds(46), Duration::seconds(45)));
    }
}
