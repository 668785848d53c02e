//! Shared Event lifecycle engine: scoring, transition, canonicalisation and
//! split, used by both the pool-worker pipeline (`main.rs`) and the
//! editorial HTTP handlers (`api/routes.rs`) so the two callers never
//! duplicate the "score, transition, audit, broadcast" sequence.

use crate::alerts::{AlertDispatcher, StateTransitionOccurred};
use crate::broadcast::{Broadcaster, SequenceCounters, WsServerEvent};
use crate::db::{Db, EventRollup};
use crate::model::{
    AnchorType, DocId, Event, EventId, EventScore, EventStateHistory, EventStatus, MergeAudit,
    ReasonContribution, Tier,
};
use crate::organizer::merge::MergePlan;
use crate::scoring::{self, ScoringInput};
use crate::state_machine::{self, Trigger};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Everything the lifecycle operations below need, independent of how a
/// Document got ingested — shared between the fetch pipeline and the
/// editorial API surface.
pub struct EventEngine {
    pub db: Arc<Db>,
    pub broadcaster: Arc<Broadcaster>,
    pub alert_dispatcher: Arc<AlertDispatcher>,
    pub sequences: Arc<SequenceCounters>,
    pub hot_score_threshold: f64,
    pub viral_velocity_threshold: f64,
}

impl EventEngine {
    /// Recomputes `SCORE_PLANTAO`/`SCORE_OCEANO_AZUL` from the Event's
    /// current attached-document rollup (§4.7), evaluates the
    /// UNVERIFIED_VIRAL override (§4.8), applies a HOT transition if the
    /// threshold is crossed, and broadcasts the refreshed state.
    pub fn score_and_transition(&self, event_id: EventId, now: DateTime<Utc>) -> Result<()> {
        let Some(mut current) = self.db.get_event(event_id)? else {
            return Ok(());
        };
        if current.status == EventStatus::Merged {
            return Ok(());
        }

        let rollup = self.db.event_rollup(event_id, current.first_seen_at, now)?;
        let age = now.signed_duration_since(current.first_seen_at);
        let scoring_input = ScoringInput {
            docs_last_minute: rollup.docs_last_minute as f64,
            docs_last_minute_prev: rollup.docs_prev_minute as f64,
            source_diversity: rollup.source_diversity,
            best_tier: rollup.best_tier,
            strong_anchor_count: rollup.strong_anchor_count,
            has_pdf: rollup.has_pdf,
            has_official_domain: rollup.has_official_domain,
            age,
            coverage_lag: rollup.coverage_lag,
            tier1_confirmed: rollup.tier1_confirmed,
        };
        let plantao = scoring::score_plantao(&scoring_input);
        let oceano = scoring::score_oceano_azul(&scoring_input);

        let mut reasons: Vec<ReasonContribution> = Vec::new();
        reasons.extend(plantao.reasons.iter().cloned());
        reasons.extend(oceano.reasons.iter().cloned());

        self.db.upsert_score(&EventScore {
            event_id,
            score_plantao: plantao.score,
            score_oceano_azul: oceano.score,
            reasons: reasons.clone(),
            computed_at: now,
        })?;

        let velocity_extreme = scoring_input.docs_last_minute >= self.viral_velocity_threshold;
        let high_tier = scoring_input.best_tier == Tier::One;
        let high_source_diversity = scoring_input.source_diversity >= 3;
        let minimal_evidence = scoring_input.strong_anchor_count == 0
            && !scoring_input.has_pdf
            && !scoring_input.has_official_domain;
        let should_flag = state_machine::should_flag_unverified_viral(
            velocity_extreme,
            high_tier,
            high_source_diversity,
            minimal_evidence,
        );
        state_machine::apply_unverified_viral(&mut current.flags, should_flag);
        self.db.update_flags(event_id, &current.flags)?;

        let has_strong_anchor_or_tier1 = scoring_input.strong_anchor_count > 0 || scoring_input.tier1_confirmed;
        if plantao.score >= self.hot_score_threshold || oceano.score >= self.hot_score_threshold {
            self.apply_transition(
                event_id,
                current.status,
                Trigger::ScoreCrossedHotThreshold { has_strong_anchor_or_tier1 },
                now,
            )?;
        }

        let refreshed = self.db.get_event(event_id)?.unwrap_or(current);
        self.broadcast_upsert(&refreshed, &rollup, plantao.score, oceano.score, &reasons);
        Ok(())
    }

    fn apply_transition(&self, event_id: EventId, from: EventStatus, trigger: Trigger, now: DateTime<Utc>) -> Result<()> {
        let Some(to) = state_machine::transition(from, trigger) else {
            return Ok(());
        };
        let Some(current) = self.db.get_event(event_id)? else {
            return Ok(());
        };
        let applied = self
            .db
            .update_status_optimistic(event_id, current.last_seen_at, to, now)?;
        if !applied {
            return Ok(());
        }
        self.db.append_state_history(&EventStateHistory {
            event_id,
            status: to,
            reason_code: format!("{:?}", trigger),
            at: now,
        })?;
        let transition = StateTransitionOccurred { event_id, from, to };
        self.alert_dispatcher.evaluate(&transition, now);
        self.broadcast_state_change(event_id, from, to, &format!("{:?}", trigger), now);
        Ok(())
    }

    fn broadcast_upsert(&self, event: &Event, rollup: &EventRollup, score_plantao: f64, score_oceano_azul: f64, reasons: &[ReasonContribution]) {
        let seq = self.sequences.next(event.event_id);
        self.broadcaster.publish(WsServerEvent::EventUpsert {
            event_id: event.event_id,
            seq,
            status: event.status,
            summary: event.summary.clone(),
            lane: event.lane.clone(),
            score_plantao,
            score_oceano_azul,
            reasons: serde_json::to_value(reasons).unwrap_or(serde_json::Value::Null),
            anchors: Vec::new(),
            doc_count: rollup.doc_count,
            source_count: rollup.source_diversity,
            first_seen_at: event.first_seen_at,
            last_seen_at: event.last_seen_at,
            flags: event.flags.clone(),
        });
    }

    fn broadcast_state_change(&self, event_id: EventId, from: EventStatus, to: EventStatus, reason_code: &str, at: DateTime<Utc>) {
        let seq = self.sequences.next(event_id);
        self.broadcaster.publish(WsServerEvent::EventStateChanged {
            event_id,
            seq,
            previous_status: from,
            new_status: to,
            reason_code: reason_code.to_string(),
            at,
        });
    }

    /// Carries out a `MergePlan` (§4.6 `DEFER_MERGE`, editorial `MERGE`):
    /// re-homes each follower's documents onto the canonical Event, dedups
    /// on `(event_id, doc_id)`, transitions the follower to `MERGED`,
    /// appends a `MergeAudit`, emits `EVENT_MERGED`, and recomputes the
    /// canonical Event's scores once every follower has been folded in.
    ///
    /// `evidence_anchor` is `Some` for anchor-driven canonicalisation
    /// (§4.6 `DEFER_MERGE`) and `None` for an editorial `MERGE` request,
    /// which has no shared anchor to cite.
    pub fn canonicalize(&self, plan: &MergePlan, evidence_anchor: Option<(AnchorType, String)>, now: DateTime<Utc>) -> Result<()> {
        let reason_code = if evidence_anchor.is_some() {
            crate::organizer::merge::REASON_DEFERRED_ANCHOR_MERGE
        } else {
            "EDITORIAL_MERGE"
        };

        let mut applied_any = false;
        for &from_event_id in &plan.followers {
            let Some(follower) = self.db.get_event(from_event_id)? else {
                continue;
            };
            if follower.status == EventStatus::Merged {
                continue;
            }

            self.db.rehome_event_docs(from_event_id, plan.canonical_event_id)?;
            let transitioned = self
                .db
                .update_status_optimistic(from_event_id, follower.last_seen_at, EventStatus::Merged, now)?;
            if transitioned {
                self.db.append_state_history(&EventStateHistory {
                    event_id: from_event_id,
                    status: EventStatus::Merged,
                    reason_code: reason_code.to_string(),
                    at: now,
                })?;
            }
            self.db.set_canonical(from_event_id, plan.canonical_event_id)?;
            self.db.insert_merge_audit(&MergeAudit {
                from_event_id,
                to_event_id: plan.canonical_event_id,
                reason_code: reason_code.to_string(),
                evidence_anchor: evidence_anchor.clone(),
                merged_at: now,
            })?;

            let seq = self.sequences.next(from_event_id);
            self.broadcaster.publish(WsServerEvent::EventMerged {
                event_id: from_event_id,
                seq,
                from_event_id,
                to_event_id: plan.canonical_event_id,
                reason_code: reason_code.to_string(),
            });
            applied_any = true;
        }

        if applied_any {
            self.score_and_transition(plan.canonical_event_id, now)?;
        }
        Ok(())
    }

    /// Peels `doc_ids` off `event_id` into a brand-new Event starting at
    /// `HYDRATING`, then re-scores both the new and the source Event
    /// (§4.12 `SPLIT`).
    pub fn split(&self, event_id: EventId, doc_ids: &[DocId], now: DateTime<Utc>) -> Result<Option<EventId>> {
        let Some(source_event) = self.db.get_event(event_id)? else {
            return Ok(None);
        };

        let new_event_id = Uuid::new_v4();
        let new_event = Event {
            event_id: new_event_id,
            status: EventStatus::Hydrating,
            flags: HashSet::new(),
            canonical_event_id: None,
            first_seen_at: now,
            last_seen_at: now,
            summary: format!("{} (split)", source_event.summary),
            lane: source_event.lane.clone(),
            seq: 0,
        };
        self.db.insert_event(&new_event)?;
        self.db.move_event_docs(event_id, new_event_id, doc_ids)?;

        self.score_and_transition(new_event_id, now)?;
        self.score_and_transition(event_id, now)?;
        Ok(Some(new_event_id))
    }
}
