//! C7 — Scoring Engine (§4.7).
//!
//! Computes `SCORE_PLANTAO` (velocity-driven) and `SCORE_OCEANO_AZUL`
//! (evidence-driven) on every Event touch, each with a stable, additive
//! `reasons` list (§9 "stable reason codes as a closed vocabulary").

use crate::model::{ReasonContribution, Tier};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Closed, append-only vocabulary of reason codes. Codes are additive-only
/// across releases — a unit test below asserts the string set never
/// shrinks (§4.7, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    PlantaoVelocitySpike,
    PlantaoTier1Confirmation,
    PlantaoSourceDiversity,
    PlantaoAgeDecay,
    OceanoEvidencePdf,
    OceanoEvidenceOfficialDomain,
    OceanoCoverageLag,
    OceanoStrongAnchorDensity,
    TrustPenaltyLowTier,
}

impl ReasonCode {
    pub const ALL: &'static [ReasonCode] = &[
        ReasonCode::PlantaoVelocitySpike,
        ReasonCode::PlantaoTier1Confirmation,
        ReasonCode::PlantaoSourceDiversity,
        ReasonCode::PlantaoAgeDecay,
        ReasonCode::OceanoEvidencePdf,
        ReasonCode::OceanoEvidenceOfficialDomain,
        ReasonCode::OceanoCoverageLag,
        ReasonCode::OceanoStrongAnchorDensity,
        ReasonCode::TrustPenaltyLowTier,
    ];
}

/// Everything the scoring engine needs about an Event's current evidence
/// and activity, gathered by the caller from storage (§4.7).
#[derive(Debug, Clone)]
pub struct ScoringInput {
    pub docs_last_minute: f64,
    pub docs_last_minute_prev: f64,
    pub source_diversity: u32,
    pub best_tier: Tier,
    pub strong_anchor_count: u32,
    pub has_pdf: bool,
    pub has_official_domain: bool,
    pub age: Duration,
    /// Elapsed time since the first Tier-1 source covered this event's
    /// fact, or `None` if no Tier-1 source has covered it yet (coverage lag
    /// of +infinity per §4.7).
    pub coverage_lag: Option<Duration>,
    pub tier1_confirmed: bool,
}

const HALF_LIFE_MINUTES: f64 = 45.0;

fn exponential_decay(age: Duration) -> f64 {
    let age_minutes = age.num_seconds() as f64 / 60.0;
    0.5f64.powf(age_minutes / HALF_LIFE_MINUTES)
}

fn tier_weight(tier: Tier) -> f64 {
    match tier {
        Tier::One => 1.0,
        Tier::Two => 0.6,
        Tier::Three => 0.3,
    }
}

fn trust_penalty(tier: Tier, strong_anchor_count: u32) -> f64 {
    // Strong evidence reduces the trust penalty even for lower-tier sources
    // (§4.7 "-trust_penalty_reduced_when_strong_evidence").
    let base = match tier {
        Tier::One => 0.0,
        Tier::Two => 0.1,
        Tier::Three => 0.25,
    };
    let reduction = (strong_anchor_count as f64 * 0.04).min(base);
    base - reduction
}

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub score: f64,
    pub reasons: Vec<ReasonContribution>,
}

/// `SCORE_PLANTAO`: velocity combines documents-per-minute and its first
/// derivative, decayed exponentially by age (§4.7).
pub fn score_plantao(input: &ScoringInput) -> ScoreResult {
    let mut reasons = Vec::new();
    let velocity = input.docs_last_minute;
    let acceleration = (input.docs_last_minute - input.docs_last_minute_prev).max(0.0);

    let mut raw = tier_weight(input.best_tier) * (velocity + 0.5 * acceleration);
    if acceleration > 0.5 {
        let contribution = (acceleration * 0.1).min(0.3);
        raw += contribution;
        reasons.push(ReasonContribution { code: ReasonCode::PlantaoVelocitySpike, weight: contribution });
    }
    if input.tier1_confirmed {
        raw += 0.25;
        reasons.push(ReasonContribution { code: ReasonCode::PlantaoTier1Confirmation, weight: 0.25 });
    }
    if input.source_diversity >= 3 {
        let contribution = (input.source_diversity as f64 * 0.03).min(0.2);
        raw += contribution;
        reasons.push(ReasonContribution { code: ReasonCode::PlantaoSourceDiversity, weight: contribution });
    }

    let penalty = trust_penalty(input.best_tier, input.strong_anchor_count);
    if penalty > 0.0 {
        raw -= penalty;
        reasons.push(ReasonContribution { code: ReasonCode::TrustPenaltyLowTier, weight: -penalty });
    }

    let decay = exponential_decay(input.age);
    reasons.push(ReasonContribution { code: ReasonCode::PlantaoAgeDecay, weight: decay });

    ScoreResult {
        score: (raw.max(0.0) * decay).min(1.0),
        reasons,
    }
}

/// `SCORE_OCEANO_AZUL`: evidence multiplier times a coverage-lag factor,
/// minus a trust penalty that is itself reduced when evidence is strong
/// (§4.7).
pub fn score_oceano_azul(input: &ScoringInput) -> ScoreResult {
    let mut reasons = Vec::new();

    let mut evidence_multiplier = 1.0 + (input.strong_anchor_count as f64 * 0.15).min(0.6);
    if input.strong_anchor_count > 0 {
        reasons.push(ReasonContribution {
            code: ReasonCode::OceanoStrongAnchorDensity,
            weight: (input.strong_anchor_count as f64 * 0.15).min(0.6),
        });
    }
    if input.has_pdf {
        evidence_multiplier += 0.15;
        reasons.push(ReasonContribution { code: ReasonCode::OceanoEvidencePdf, weight: 0.15 });
    }
    if input.has_official_domain {
        evidence_multiplier += 0.1;
        reasons.push(ReasonContribution { code: ReasonCode::OceanoEvidenceOfficialDomain, weight: 0.1 });
    }

    // Coverage lag: the longer a fact waits for Tier-1 confirmation, the
    // more "underreported" it is — this is the Blue Ocean surface's whole
    // reason to exist, so lag *raises* the score up to a cap. No coverage
    // yet is treated as +infinity lag, i.e. the cap.
    let lag_hours = input
        .coverage_lag
        .map(|d| d.num_seconds() as f64 / 3600.0)
        .unwrap_or(f64::INFINITY);
    let lag_factor = (lag_hours / 24.0).min(1.0);
    reasons.push(ReasonContribution { code: ReasonCode::OceanoCoverageLag, weight: lag_factor });

    let penalty = trust_penalty(input.best_tier, input.strong_anchor_count);
    if penalty > 0.0 {
        reasons.push(ReasonContribution { code: ReasonCode::TrustPenaltyLowTier, weight: -penalty });
    }

    let raw = (evidence_multiplier * (0.4 + 0.6 * lag_factor)) - penalty;
    ScoreResult {
        score: raw.max(0.0).min(1.0),
        reasons,
    }
}
