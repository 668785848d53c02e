//! End-to-end scenarios strung together from the public modules, the same
//! level the library's own unit tests stop short of: a whole Document
//! travelling through anchoring, clustering, scoring and the state machine
//! against a real (in-memory) database.

use chrono::{Duration, Utc};
use pautaradar::anchors;
use pautaradar::db::Db;
use pautaradar::model::{Event, EventDoc, EventFlag, EventStatus, Tier};
use pautaradar::organizer::{self, ClusterIndex, DocFingerprint, OrganizerConfig};
use pautaradar::scoring::{self, ScoringInput};
use pautaradar::state_machine::{self, Trigger};
use std::collections::HashSet;
use uuid::Uuid;

fn organizer_config() -> OrganizerConfig {
    OrganizerConfig {
        hard_merge_window: Duration::hours(6),
        near_dup_window: Duration::hours(6),
        near_dup_hamming_threshold: 6,
        same_event_window: Duration::hours(6),
        same_event_similarity_threshold: 0.5,
    }
}

fn new_event(now: chrono::DateTime<Utc>, summary: &str) -> Event {
    Event {
        event_id: Uuid::new_v4(),
        status: EventStatus::Hydrating,
        flags: HashSet::new(),
        canonical_event_id: None,
        first_seen_at: now,
        last_seen_at: now,
        summary: summary.to_string(),
        lane: "governo".to_string(),
        seq: 0,
    }
}

/// Scenario 1 (spec.md §8): a tier-1 RSS item linking a `.gov.br` decree PDF
/// carries a strong ACT anchor and a MONEY anchor, and scores high enough on
/// SCORE_OCEANO_AZUL to clear the evidence bar.
#[test]
fn decree_pdf_document_scores_high_on_oceano_azul() {
    let text = "O Decreto 11.555/2025 abre credito extraordinario de R$ 4.500.000.000 para o orgao, publicado em https://in.gov.br/decreto.pdf";
    let found = anchors::extract_anchors(text);
    assert!(found.iter().any(|a| a.anchor_type == pautaradar::model::AnchorType::Act));
    assert!(found.iter().any(|a| a.anchor_type == pautaradar::model::AnchorType::Money));

    let evidence = anchors::evidence_features(text, &found, true);
    assert!(evidence.has_official_domain);
    assert!(evidence.anchor_count >= 2);

    let input = ScoringInput {
        docs_last_minute: 1.0,
        docs_last_minute_prev: 0.0,
        source_diversity: 1,
        best_tier: Tier::One,
        strong_anchor_count: evidence.anchor_count,
        has_pdf: true,
        has_official_domain: evidence.has_official_domain,
        age: Duration::minutes(5),
        coverage_lag: Some(Duration::zero()),
        tier1_confirmed: true,
    };
    let result = scoring::score_oceano_azul(&input);
    assert!(result.score >= 0.7, "expected score >= 0.7, got {}", result.score);
    assert!(result
        .reasons
        .iter()
        .any(|r| r.code == scoring::ReasonCode::OceanoEvidencePdf));
}

/// Scenario 2 (spec.md §8): two articles sharing a CNJ judicial process id
/// 90 seconds apart attach to the same Event via hard-anchor merge, and no
/// second Event is ever visible.
#[test]
fn shared_cnj_anchor_hard_merges_across_sources() {
    let db = Db::open_in_memory().unwrap();
    let index = ClusterIndex::new();
    let config = organizer_config();
    let now = Utc::now();

    let cnj = pautaradar::model::AnchorType::Cnj;
    let process_id = "0001234-56.2025.1.00.0000".to_string();

    let e1 = new_event(now, "Tribunal abre processo judicial");
    db.insert_event(&e1).unwrap();
    let fp1 = DocFingerprint {
        doc_id: Uuid::new_v4(),
        event_id: e1.event_id,
        anchors: vec![(cnj, process_id.clone())],
        simhash: organizer::simhash::simhash("tribunal abre processo judicial contra empresa"),
        title_tokens: ["tribunal", "abre", "processo"].into_iter().map(String::from).collect(),
        entities: HashSet::new(),
        seen_at: now,
    };
    let anchor = pautaradar::model::Anchor {
        anchor_type: cnj,
        value: process_id.clone(),
        span_start: 0,
        span_end: process_id.len() as u32,
        confidence: 0.98,
    };
    db.insert_anchors(fp1.doc_id, std::slice::from_ref(&anchor)).unwrap();
    db.attach_document(&EventDoc { event_id: e1.event_id, doc_id: fp1.doc_id, seen_at: now, is_primary: true })
        .unwrap();
    index.record(fp1);

    let candidate_event_id = Uuid::new_v4();
    let fp2 = DocFingerprint {
        doc_id: Uuid::new_v4(),
        event_id: candidate_event_id,
        anchors: vec![(cnj, process_id.clone())],
        simhash: organizer::simhash::simhash("segunda fonte confirma decisao do tribunal"),
        title_tokens: ["segunda", "fonte", "confirma"].into_iter().map(String::from).collect(),
        entities: HashSet::new(),
        seen_at: now + Duration::seconds(90),
    };

    let decision = organizer::decide(&index, &fp2, &config, now + Duration::seconds(90));
    match decision {
        organizer::ClusterDecision::Attach { event_id, .. } => {
            assert_eq!(event_id, e1.event_id);
            db.insert_anchors(fp2.doc_id, std::slice::from_ref(&anchor)).unwrap();
            db.attach_document(&EventDoc {
                event_id,
                doc_id: fp2.doc_id,
                seen_at: now + Duration::seconds(90),
                is_primary: false,
            })
            .unwrap();
        }
        organizer::ClusterDecision::NewEvent => panic!("expected hard-anchor merge into the existing event"),
    }

    let sharing = db.events_sharing_anchor(cnj, &process_id).unwrap();
    assert_eq!(sharing, vec![e1.event_id]);
}

/// Scenario 5 (spec.md §8): extreme velocity with no strong anchor and no
/// Tier-1 confirmation inside the FAST gate window transitions the Event to
/// PARTIAL_ENRICH and flags it UNVERIFIED_VIRAL.
#[test]
fn viral_document_without_strong_evidence_flags_unverified_and_holds_at_partial_enrich() {
    let mut flags: HashSet<EventFlag> = HashSet::new();
    let should_flag = state_machine::should_flag_unverified_viral(true, false, false, true);
    assert!(should_flag);
    state_machine::apply_unverified_viral(&mut flags, should_flag);
    assert!(flags.contains(&EventFlag::UnverifiedViral));

    let next = state_machine::transition(EventStatus::Hydrating, Trigger::FastGateTimeoutNoStrongEvidence);
    assert_eq!(next, Some(EventStatus::PartialEnrich));

    assert!(!state_machine::is_action_permitted(
        EventStatus::PartialEnrich,
        state_machine::Action::DispatchVerifiedDraft
    ));
    assert!(state_machine::is_action_permitted(
        EventStatus::PartialEnrich,
        state_machine::Action::DispatchUnverifiedDraft
    ));
}

/// Invariant 1 (spec.md §8): re-processing the same content hash is a no-op
/// — no new Document version, and therefore no re-score.
#[test]
fn reprocessing_identical_content_hash_creates_no_new_version() {
    use pautaradar::extract::{decide_version, ExtractedCandidate};

    let candidate = ExtractedCandidate {
        url: "https://diario.gov.br/edicao/123".to_string(),
        content_hash: "abc123".to_string(),
        clean_text: "texto inalterado".to_string(),
        title: "Edicao 123".to_string(),
        lang: Some("pt".to_string()),
        canonical_url: None,
        published_at: None,
        modified_at: None,
    };

    let first = decide_version(candidate.clone(), None, 0, "diario-oficial", None);
    assert!(first.is_some());
    let stored_hash = first.unwrap().content_hash;

    let second = decide_version(candidate, Some(&stored_hash), 1, "diario-oficial", None);
    assert!(second.is_none());
}

/// Boundary behaviour (spec.md §8): QUARANTINE at exactly TTL expires to
/// EXPIRED.
#[test]
fn quarantine_ttl_elapsed_transitions_to_expired() {
    let next = state_machine::transition(EventStatus::Quarantine, Trigger::QuarantineTtlElapsed);
    assert_eq!(next, Some(EventStatus::Expired));
}
