//! C5 — Anchor & Evidence Engine (§4.5).
//!
//! Regex-based deterministic extraction across the canonical categories,
//! plus the evidence score: a monotonic combination of strong-anchor count,
//! PDF/official-domain presence, table-like layout, and money mentions
//! (§8 invariant 5 — adding a strong anchor never decreases the score).

use crate::model::{Anchor, AnchorType, EvidenceFeatures};
use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    cnpj: Regex,
    cpf: Regex,
    cnj: Regex,
    sei: Regex,
    tcu: Regex,
    pl: Regex,
    act: Regex,
    money: Regex,
    gov_link: Regex,
    pdf_link: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // 14-digit CNPJ, masked or unmasked.
        cnpj: Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").unwrap(),
        // 11-digit CPF, masked or unmasked.
        cpf: Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b").unwrap(),
        // CNJ unified judicial process number: NNNNNNN-DD.AAAA.J.TR.OOOO
        cnj: Regex::new(r"\b\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}\b").unwrap(),
        // SEI administrative process number.
        sei: Regex::new(r"\bSEI\s*n?[ºo°]?\s*\d{5}\.\d{6}/\d{4}-\d{2}\b").unwrap(),
        // TCU audit-court act (Acordao NNNN/AAAA).
        tcu: Regex::new(r"(?i)\bAc[oó]rd[aã]o\s+n?[ºo°]?\s*\d{1,6}/\d{4}\b").unwrap(),
        // PL bill identifier.
        pl: Regex::new(r"(?i)\bPL\s+n?[ºo°]?\s*\d{1,6}/\d{4}\b").unwrap(),
        // Decree/Ordinance/Resolution with number-year.
        act: Regex::new(
            r"(?i)\b(Decreto|Portaria|Resolu[cç][aã]o)\s+n?[ºo°]?\s*\d{1,6}(?:\.\d{3})?/\d{4}\b",
        )
        .unwrap(),
        // R$ monetary values.
        money: Regex::new(r"R\$\s?\d{1,3}(?:\.\d{3})*(?:,\d{2})?").unwrap(),
        gov_link: Regex::new(r"https?://[^\s\x22\x27]*\.gov(?:\.br)?[^\s\x22\x27]*").unwrap(),
        pdf_link: Regex::new(r"https?://[^\s\x22\x27]*\.pdf\b").unwrap(),
    })
}

fn push_matches(text: &str, re: &Regex, anchor_type: AnchorType, confidence: f32, out: &mut Vec<Anchor>) {
    for m in re.find_iter(text) {
        out.push(Anchor {
            anchor_type,
            value: normalize_value(anchor_type, m.as_str()),
            span_start: m.start() as u32,
            span_end: m.end() as u32,
            confidence,
        });
    }
}

fn normalize_value(anchor_type: AnchorType, raw: &str) -> String {
    match anchor_type {
        AnchorType::Cnpj | AnchorType::Cpf => raw.chars().filter(|c| c.is_ascii_digit()).collect(),
        AnchorType::Money => {
            let digits_and_sep: String = raw
                .trim_start_matches("R$")
                .trim()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
                .collect();
            // Canonical numeric form: strip thousands separators, make the
            // decimal comma a dot, drop the decimal component for a stable
            // integer-cents-free value as the spec's example anchors do
            // (e.g. "R$ 4500000000").
            let without_thousands = digits_and_sep.replace('.', "");
            let integer_part = without_thousands
                .split(',')
                .next()
                .unwrap_or(&without_thousands);
            format!("R$ {integer_part}")
        }
        _ => raw.trim().to_string(),
    }
}

/// Extracts every anchor category from `text` (§4.5).
pub fn extract_anchors(text: &str) -> Vec<Anchor> {
    let p = patterns();
    let mut anchors = Vec::new();
    push_matches(text, &p.cnj, AnchorType::Cnj, 0.98, &mut anchors);
    push_matches(text, &p.sei, AnchorType::Sei, 0.95, &mut anchors);
    push_matches(text, &p.tcu, AnchorType::Tcu, 0.9, &mut anchors);
    push_matches(text, &p.pl, AnchorType::Pl, 0.9, &mut anchors);
    push_matches(text, &p.act, AnchorType::Act, 0.92, &mut anchors);
    push_matches(text, &p.cnpj, AnchorType::Cnpj, 0.85, &mut anchors);
    push_matches(text, &p.cpf, AnchorType::Cpf, 0.7, &mut anchors);
    push_matches(text, &p.money, AnchorType::Money, 0.8, &mut anchors);
    push_matches(text, &p.gov_link, AnchorType::GovLink, 0.99, &mut anchors);
    push_matches(text, &p.pdf_link, AnchorType::PdfLink, 0.99, &mut anchors);
    anchors
}

/// A loose heuristic for "looks like a table": repeated runs of
/// whitespace-separated numeric columns. Cheap and good enough for the
/// evidence-score signal it feeds; not a layout parser.
fn has_table_like_layout(text: &str) -> bool {
    text.lines()
        .filter(|line| {
            let numeric_tokens = line
                .split_whitespace()
                .filter(|tok| tok.chars().any(|c| c.is_ascii_digit()))
                .count();
            numeric_tokens >= 3
        })
        .count()
        >= 2
}

/// Computes `EvidenceFeatures` for a document (§4.5). The scoring function
/// is monotone in strong-anchor count by construction: every term is a
/// non-negative additive contribution, so adding a strong anchor can only
/// raise (never lower) `evidence_score` (§3 invariant / §8 invariant 5).
pub fn evidence_features(text: &str, anchors: &[Anchor], has_official_domain: bool) -> EvidenceFeatures {
    let strong_anchor_count = anchors.iter().filter(|a| a.anchor_type.is_strong()).count() as u32;
    let has_pdf = anchors.iter().any(|a| a.anchor_type == AnchorType::PdfLink);
    let money_mention_count = anchors
        .iter()
        .filter(|a| a.anchor_type == crate::model::AnchorType::Money)
        .count() as u32;
    let has_table_like = has_table_like_layout(text);

    let mut score = 0.0;
    score += strong_anchor_count as f64 * 0.2;
    if has_pdf {
        score += 0.15;
    }
    if has_official_domain {
        score += 0.15;
    }
    if has_table_like {
        score += 0.1;
    }
    score += (money_mention_count as f64 * 0.05).min(0.2);
    let evidence_score = score.min(1.0);

    EvidenceFeatures {
        evidence_score,
        has_pdf,
        has_official_domain,
        anchor_count: anchors.len() as u32,
        strong_anchor_count,
        money_mention_count,
        has_table_like,
    }
}

/// Entity extraction (§3 entity, §4.6 rule 3): a deterministic, regex-based
/// pass over runs of capitalized words, the same shape as the anchor
/// extractors above rather than an NLP model — good enough to drive the
/// "overlapping entity mentions" cluster signal without a model dependency.
fn entity_pattern() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| {
        Regex::new(r"\b(?:[A-ZÀ-Ü][\p{L}]*(?:\s+(?:d[aeo]s?|de|do|da)\b)?\s*){2,5}\b")
            .unwrap()
    })
}

/// Stopwords that look like entity starts but aren't (sentence-initial
/// capitals, months, weekdays) are filtered by requiring >= 2 words.
pub fn extract_entities(text: &str) -> Vec<crate::model::EntityMention> {
    let re = entity_pattern();
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for m in re.find_iter(text) {
        let raw = m.as_str().trim();
        let word_count = raw.split_whitespace().count();
        if word_count < 2 {
            continue;
        }
        let entity_key = raw.to_lowercase();
        if !seen.insert(entity_key.clone()) {
            continue;
        }
        out.push(crate::model::EntityMention {
            entity_key,
            label: raw.to_string(),
            span_start: m.start() as u32,
            span_end: m.end() as u32,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "O Decreto 11.555/2025 abre credito extraordinario de R$ 4.500.000.000,00 \
        para o orgao, conforme https://in.gov.br/decreto-11555.pdf.";

    #[test]
    fn extracts_act_money_and_links() {
        let anchors = extract_anchors(SAMPLE);
        let has = |t: AnchorType| anchors.iter().any(|a| a.anchor_type == t);
        assert!(has(AnchorType::Act));
        assert!(has(AnchorType::Money));
        assert!(has(AnchorType::GovLink));
        assert!(has(AnchorType::PdfLink));
    }

    #[test]
    fn money_normalizes_to_canonical_integer_form() {
        let anchors = extract_anchors(SAMPLE);
        let money = anchors
            .iter()
            .find(|a| a.anchor_type == AnchorType::Money)
            .unwrap();
        assert_eq!(money.value, "R$ 4500000000");
    }

    #[test]
    fn evidence_score_is_monotone_in_strong_anchor_count() {
        let base_anchors = vec![Anchor {
            anchor_type: AnchorType::Money,
            value: "R$ 100".to_string(),
            span_start: 0,
            span_end: 1,
            confidence: 0.8,
        }];
        let base = evidence_features(SAMPLE, &base_anchors, false);

        let mut with_strong = base_anchors.clone();
        with_strong.push(Anchor {
            anchor_type: AnchorType::Act,
            value: "Decreto 1/2025".to_string(),
            span_start: 0,
            span_end: 1,
            confidence: 0.9,
        });
        let augmented = evidence_features(SAMPLE, &with_strong, false);

        assert!(augmented.evidence_score >= base.evidence_score);
    }

    #[test]
    fn extracts_multi_word_entity_mentions() {
        let text = "O Ministerio da Fazenda e o Tribunal de Contas da Uniao divergem sobre o decreto.";
        let entities = extract_entities(text);
        assert!(entities.iter().any(|e| e.entity_key.contains("ministerio")));
        assert!(entities.iter().any(|e| e.entity_key.contains("tribunal")));
    }

    #[test]
    fn entity_extraction_dedups_repeated_mentions() {
        let text = "Ministerio da Fazenda anuncia medida. Ministerio da Fazenda confirma nota.";
        let entities = extract_entities(text);
        let fazenda_hits = entities
            .iter()
            .filter(|e| e.entity_key.contains("ministerio"))
            .count();
        assert_eq!(fazenda_hits, 1);
    }

    #[test]
    fn cnj_pattern_matches_example_scenario_id() {
        let text = "processo CNJ 0001234-56.2025.1.00.0000 foi distribuido.";
        let anchors = extract_anchors(text);
        assert!(anchors.iter().any(|a| a.anchor_type == AnchorType::Cnj
            && a.value == "0001234-56.2025.1.00.0000"));
    }
}
