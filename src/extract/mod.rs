//! C4 — Extractor (§4.4): turns a raw fetched payload into a versioned
//! [`Document`]. A new version is created only when the per-item content
//! hash differs from the latest stored version for that url (§8 invariant 1
//! and §3 invariant 1).

pub mod api_json;
pub mod html;
pub mod pdf;
pub mod rss;

use crate::error::ContentError;
use crate::model::Document;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A candidate Document extracted from a raw payload, before the
/// versioning decision against storage.
#[derive(Debug, Clone)]
pub struct ExtractedCandidate {
    pub url: String,
    pub content_hash: String,
    pub clean_text: String,
    pub title: String,
    pub lang: Option<String>,
    pub canonical_url: Option<String>,
    pub published_at: Option<chrono::DateTime<Utc>>,
    pub modified_at: Option<chrono::DateTime<Utc>>,
}

pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Turns an [`ExtractedCandidate`] into a stored [`Document`] version.
/// `latest_known_hash` is whatever the per-url version store currently
/// holds; passing `None` means this url has never been seen.
///
/// Returns `None` when the candidate's hash matches the latest stored
/// version — the "no-op on identical re-processing" invariant (§8
/// "Re-processing the same Snapshot twice is a no-op").
pub fn decide_version(
    candidate: ExtractedCandidate,
    latest_known_hash: Option<&str>,
    latest_known_version_no: u32,
    source_id: &str,
    snapshot_hash: Option<String>,
) -> Option<Document> {
    if latest_known_hash == Some(candidate.content_hash.as_str()) {
        return None;
    }
    Some(Document {
        doc_id: Uuid::new_v4(),
        url: candidate.url,
        version_no: latest_known_version_no + 1,
        content_hash: candidate.content_hash,
        clean_text: candidate.clean_text,
        title: candidate.title,
        lang: candidate.lang,
        canonical_url: candidate.canonical_url,
        published_at: candidate.published_at,
        modified_at: candidate.modified_at,
        snapshot_hash,
        source_id: source_id.to_string(),
        discovered_at: Utc::now(),
    })
}

pub fn require_nonempty_text(text: &str) -> Result<(), ContentError> {
    if text.trim().is_empty() {
        return Err(ContentError::EmptyText);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(hash: &str) -> ExtractedCandidate {
        ExtractedCandidate {
            url: "https://in.gov.br/decreto-1".to_string(),
            content_hash: hash.to_string(),
            clean_text: "texto".to_string(),
            title: "Decreto".to_string(),
            lang: Some("pt-BR".to_string()),
            canonical_url: None,
            published_at: None,
            modified_at: None,
        }
    }

    #[test]
    fn first_sighting_creates_version_one() {
        let doc = decide_version(candidate("h1"), None, 0, "src", None).unwrap();
        assert_eq!(doc.version_no, 1);
    }

    #[test]
    fn unchanged_hash_creates_no_new_version() {
        let result = decide_version(candidate("h1"), Some("h1"), 1, "src", None);
        assert!(result.is_none());
    }

    #[test]
    fn changed_hash_creates_next_version() {
        let doc = decide_version(candidate("h2"), Some("h1"), 1, "src", None).unwrap();
        assert_eq!(doc.version_no, 2);
    }
}
