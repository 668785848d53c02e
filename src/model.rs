//! Core data model (§3).
//!
//! Plain serde-derived structs mirroring the teacher's `models.rs` shape:
//! small, `Clone`-able value types with `chrono::DateTime<Utc>` timestamps
//! and `Option<T>` for nullable columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type SourceId = String;
pub type EventId = Uuid;
pub type DocId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    One = 1,
    Two = 2,
    Three = 3,
}

impl Tier {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Tier::One),
            2 => Some(Tier::Two),
            3 => Some(Tier::Three),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pool {
    FastPool,
    HeavyRenderPool,
    DeepExtractPool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Rss,
    Html,
    Api,
    SpaApi,
    SpaHeadless,
    Pdf,
}

/// Source (§3): a stable ingestion target, mutated only by administrative loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_id: SourceId,
    pub source_domain: String,
    pub tier: Tier,
    pub is_official: bool,
    pub lang: String,
    pub pool: Pool,
    pub strategy: Strategy,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorClass {
    None,
    Transport,
    Http,
    Content,
    Policy,
    Storage,
    Logic,
}

/// FetchAttempt (§3): one immutable record per network attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub attempt_id: Uuid,
    pub source_id: SourceId,
    pub url: String,
    pub status_code: Option<u16>,
    pub error_class: FetchErrorClass,
    pub latency_ms: u64,
    pub bytes_read: u64,
    pub pool: Pool,
    pub snapshot_hash: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Snapshot (§3): fetched raw body addressed by content hash. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub content_hash: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Reference to the external blob store; the body itself is not kept in-memory.
    pub blob_ref: String,
    pub byte_len: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Document (§3): canonical extracted content for a url, versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    pub url: String,
    pub version_no: u32,
    pub content_hash: String,
    pub clean_text: String,
    pub title: String,
    pub lang: Option<String>,
    pub canonical_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub snapshot_hash: Option<String>,
    pub source_id: SourceId,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorType {
    Cnpj,
    Cpf,
    Cnj,
    Sei,
    Tcu,
    Pl,
    Act,
    Money,
    Date,
    GovLink,
    PdfLink,
}

impl AnchorType {
    /// Strong anchors are the ones eligible for hard-merge and HOT-gating
    /// "strong anchor" checks (§4.8); weak anchors (dates, generic links)
    /// never drive a merge or a HOT transition on their own.
    pub fn is_strong(self) -> bool {
        matches!(
            self,
            AnchorType::Cnpj
                | AnchorType::Cpf
                | AnchorType::Cnj
                | AnchorType::Sei
                | AnchorType::Tcu
                | AnchorType::Pl
                | AnchorType::Act
        )
    }
}

/// Anchor (§3): a deterministic fact extracted from a Document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_type: AnchorType,
    pub value: String,
    pub span_start: u32,
    pub span_end: u32,
    pub confidence: f32,
}

impl Anchor {
    /// The `(type, value)` pair invariant #4 indexes and merges on.
    pub fn key(&self) -> (AnchorType, &str) {
        (self.anchor_type, self.value.as_str())
    }
}

/// EvidenceFeatures (§3): per-document evidence summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceFeatures {
    pub evidence_score: f64,
    pub has_pdf: bool,
    pub has_official_domain: bool,
    pub anchor_count: u32,
    pub strong_anchor_count: u32,
    pub money_mention_count: u32,
    pub has_table_like: bool,
}

/// EntityMention (§3): per-document named entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub entity_key: String,
    pub label: String,
    pub span_start: u32,
    pub span_end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    New,
    Hydrating,
    PartialEnrich,
    FailedEnrich,
    Quarantine,
    Hot,
    Merged,
    Ignored,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventFlag {
    UnverifiedViral,
}

/// Event (§3): a cluster identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub status: EventStatus,
    pub flags: HashSet<EventFlag>,
    pub canonical_event_id: Option<EventId>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub summary: String,
    pub lane: String,
    pub seq: u64,
}

impl Event {
    pub fn is_canonical(&self) -> bool {
        self.canonical_event_id.is_none()
    }
}

/// EventDoc (§3): Event<->Document edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    pub event_id: EventId,
    pub doc_id: DocId,
    pub seen_at: DateTime<Utc>,
    pub is_primary: bool,
}

/// A single stable, additive-only reason code with its numeric contribution
/// (§4.7, §9 "stable reason codes as a closed vocabulary").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonContribution {
    pub code: crate::scoring::ReasonCode,
    pub weight: f64,
}

/// EventScore (§3): latest dual scores with reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventScore {
    pub event_id: EventId,
    pub score_plantao: f64,
    pub score_oceano_azul: f64,
    pub reasons: Vec<ReasonContribution>,
    pub computed_at: DateTime<Utc>,
}

/// EventStateHistory (§3): append-only transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStateHistory {
    pub event_id: EventId,
    pub status: EventStatus,
    pub reason_code: String,
    pub at: DateTime<Utc>,
}

/// EventAlertState (§3): last-alert fingerprint and cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAlertState {
    pub event_id: EventId,
    pub last_fingerprint: String,
    pub last_alerted_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

/// MergeAudit (§3): immutable record of a canonicalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeAudit {
    pub from_event_id: EventId,
    pub to_event_id: EventId,
    pub reason_code: String,
    pub evidence_anchor: Option<(AnchorType, String)>,
    pub merged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackAction {
    Ignore,
    Snooze,
    Pautar,
    Merge,
    Split,
    NotNews,
}

/// FeedbackEvent (§3): immutable editorial action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub feedback_id: Uuid,
    pub event_id: EventId,
    pub action: FeedbackAction,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
