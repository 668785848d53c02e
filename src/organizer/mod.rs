//! C6 — Organizer (§4.6): near-dup + same-event clustering with deferred
//! canonicalisation. Runs synchronously after Anchor extraction for each
//! new Document.

pub mod merge;
pub mod simhash;

use crate::model::{AnchorType, DocId, EventId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct DocFingerprint {
    pub doc_id: DocId,
    pub event_id: EventId,
    pub anchors: Vec<(AnchorType, String)>,
    pub simhash: u64,
    pub title_tokens: HashSet<String>,
    pub entities: HashSet<String>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct EventIndexEntry {
    fingerprints: Vec<DocFingerprint>,
}

/// In-memory secondary index over documents on active (non-terminal)
/// Events, rebuilt from storage at startup and kept current as documents
/// attach. This is the fast-path read cache the synchronous clustering
/// decision runs against; the database remains the system of record (§5) —
/// this index is disposable and never consulted for anything but routing a
/// new Document to an Event.
pub struct ClusterIndex {
    by_event: DashMap<EventId, EventIndexEntry>,
}

impl ClusterIndex {
    pub fn new() -> Self {
        Self {
            by_event: DashMap::new(),
        }
    }

    pub fn record(&self, fingerprint: DocFingerprint) {
        self.by_event
            .entry(fingerprint.event_id)
            .or_insert_with(|| EventIndexEntry { fingerprints: Vec::new() })
            .fingerprints
            .push(fingerprint);
    }

    fn active_fingerprints(&self, window: Duration, now: DateTime<Utc>) -> Vec<DocFingerprint> {
        self.by_event
            .iter()
            .flat_map(|entry| entry.fingerprints.clone())
            .filter(|fp| now.signed_duration_since(fp.seen_at) <= window)
            .collect()
    }
}

impl Default for ClusterIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkageReason {
    HardMergeAnchor { anchor_type: AnchorType, value: String },
    NearDuplicate { hamming_distance: u32 },
    SameEventSimilarity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterDecision {
    Attach { event_id: EventId, reason: LinkageReason },
    NewEvent,
}

pub struct OrganizerConfig {
    pub hard_merge_window: Duration,
    pub near_dup_window: Duration,
    pub near_dup_hamming_threshold: u32,
    pub same_event_window: Duration,
    pub same_event_similarity_threshold: f64,
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Simplified title+lede similarity: token-overlap Jaccard over title
/// tokens, boosted by entity-mention overlap. A from-scratch BM25/TF-IDF
/// implementation over a full corpus needs document frequencies this
/// synchronous per-document decision doesn't have on hand; this captures
/// the same "lexical overlap plus entity corroboration" signal spec.md §4.6
/// rule 3 asks for, at the granularity the Organizer actually needs.
fn same_event_similarity(a: &DocFingerprint, b: &DocFingerprint) -> f64 {
    let title_similarity = jaccard(&a.title_tokens, &b.title_tokens);
    let entity_similarity = jaccard(&a.entities, &b.entities);
    0.6 * title_similarity + 0.4 * entity_similarity
}

/// Decides how a newly-anchored/fingerprinted Document links into the
/// cluster graph, applying the three linkage rules in order (§4.6).
pub fn decide(
    index: &ClusterIndex,
    candidate: &DocFingerprint,
    config: &OrganizerConfig,
    now: DateTime<Utc>,
) -> ClusterDecision {
    let candidate_anchor_set: HashSet<&(AnchorType, String)> = candidate.anchors.iter().collect();

    // Rule 1: hard merge by anchor (type, value) pair (§3 invariant 4).
    for fp in index.active_fingerprints(config.hard_merge_window, now) {
        if fp.event_id == candidate.event_id {
            continue;
        }
        for anchor in &fp.anchors {
            if candidate_anchor_set.contains(anchor) {
                return ClusterDecision::Attach {
                    event_id: fp.event_id,
                    reason: LinkageReason::HardMergeAnchor {
                        anchor_type: anchor.0,
                        value: anchor.1.clone(),
                    },
                };
            }
        }
    }

    // Rule 2: near-duplicate via SimHash.
    for fp in index.active_fingerprints(config.near_dup_window, now) {
        if fp.event_id == candidate.event_id {
            continue;
        }
        let distance = simhash::hamming_distance(candidate.simhash, fp.simhash);
        if distance <= config.near_dup_hamming_threshold {
            return ClusterDecision::Attach {
                event_id: fp.event_id,
                reason: LinkageReason::NearDuplicate { hamming_distance: distance },
            };
        }
    }

    // Rule 3: same-event probabilistic similarity, restricted to a time window.
    let mut best: Option<(EventId, f64)> = None;
    for fp in index.active_fingerprints(config.same_event_window, now) {
        if fp.event_id == candidate.event_id {
            continue;
        }
        let score = same_event_similarity(candidate, &fp);
        if score >= config.same_event_similarity_threshold {
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((fp.event_id, score));
            }
        }
    }
    if let Some((event_id, _)) = best {
        return ClusterDecision::Attach {
            event_id,
            reason: LinkageReason::SameEventSimilarity,
        };
    }

    ClusterDecision::NewEvent
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> OrganizerConfig {
        OrganizerConfig {
            hard_merge_window: Duration::hours(6),
            near_dup_window: Duration::hours(6),
            near_dup_hamming_threshold: 6,
            same_event_window: Duration::hours(6),
            same_event_similarity_threshold: 0.5,
        }
    }

    fn tokens(s: &str) -> HashSet<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn hard_merge_attaches_when_anchor_pair_matches() {
        let index = ClusterIndex::new();
        let existing_event = Uuid::new_v4();
        index.record(DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: existing_event,
            anchors: vec![(AnchorType::Cnj, "0001234-56.2025.1.00.0000".to_string())],
            simhash: 0xFFFF_FFFF_FFFF_0000,
            title_tokens: tokens("processo judicial aberto"),
            entities: HashSet::new(),
            seen_at: Utc::now(),
        });

        let candidate = DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            anchors: vec![(AnchorType::Cnj, "0001234-56.2025.1.00.0000".to_string())],
            simhash: 0x0000_0000_0000_FFFF,
            title_tokens: tokens("tribunal confirma decisao"),
            entities: HashSet::new(),
            seen_at: Utc::now(),
        };

        let decision = decide(&index, &candidate, &config(), Utc::now());
        assert_eq!(
            decision,
            ClusterDecision::Attach {
                event_id: existing_event,
                reason: LinkageReason::HardMergeAnchor {
                    anchor_type: AnchorType::Cnj,
                    value: "0001234-56.2025.1.00.0000".to_string(),
                },
            }
        );
    }

    #[test]
    fn near_duplicate_text_attaches_without_shared_anchor() {
        let index = ClusterIndex::new();
        let existing_event = Uuid::new_v4();
        let text = "Governo anuncia credito extraordinario para o orgao federal hoje";
        index.record(DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: existing_event,
            anchors: vec![],
            simhash: simhash::simhash(text),
            title_tokens: tokens("credito extraordinario"),
            entities: HashSet::new(),
            seen_at: Utc::now(),
        });

        let near_text = "Governo anuncia credito extraordinario para o orgao federal ontem";
        let candidate = DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            anchors: vec![],
            simhash: simhash::simhash(near_text),
            title_tokens: tokens("algo totalmente diferente"),
            entities: HashSet::new(),
            seen_at: Utc::now(),
        };

        let decision = decide(&index, &candidate, &config(), Utc::now());
        assert!(matches!(
            decision,
            ClusterDecision::Attach { event_id, reason: LinkageReason::NearDuplicate { .. } }
                if event_id == existing_event
        ));
    }

    #[test]
    fn unrelated_document_starts_a_new_event() {
        let index = ClusterIndex::new();
        let existing_event = Uuid::new_v4();
        index.record(DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: existing_event,
            anchors: vec![(AnchorType::Pl, "999/2020".to_string())],
            simhash: simhash::simhash("assunto totalmente diferente do resto"),
            title_tokens: tokens("futebol campeonato estadual"),
            entities: tokens("clube-a"),
            seen_at: Utc::now(),
        });

        let candidate = DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            anchors: vec![(AnchorType::Pl, "1234/2025".to_string())],
            simhash: simhash::simhash("orcamento federal aprovado pelo congresso nacional"),
            title_tokens: tokens("orcamento congresso nacional"),
            entities: tokens("ministerio-fazenda"),
            seen_at: Utc::now(),
        };

        assert_eq!(decide(&index, &candidate, &config(), Utc::now()), ClusterDecision::NewEvent);
    }

    #[test]
    fn stale_fingerprints_outside_window_are_ignored() {
        let index = ClusterIndex::new();
        let existing_event = Uuid::new_v4();
        index.record(DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: existing_event,
            anchors: vec![(AnchorType::Pl, "1234/2025".to_string())],
            simhash: 0,
            title_tokens: HashSet::new(),
            entities: HashSet::new(),
            seen_at: Utc::now() - Duration::days(2),
        });

        let candidate = DocFingerprint {
            doc_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            anchors: vec![(AnchorType::Pl, "1234/2025".to_string())],
            simhash: 0,
            title_tokens: HashSet::new(),
            entities: HashSet::new(),
            seen_at: Utc::now(),
        };

        assert_eq!(decide(&index, &candidate, &config(), Utc::now()), ClusterDecision::NewEvent);
    }
}
