//! `API`/`SPA_API` strategy (§4.4): JSON payload fields mapped into clean
//! text per the profile's `metadata.spa_api_contract`. `SPA_HEADLESS`
//! reuses this same mapper over the XHR payloads the Fetcher captured.

use super::{content_hash, ExtractedCandidate};
use crate::error::ContentError;
use serde::Deserialize;
use serde_json::Value;

/// The subset of `metadata.spa_api_contract` this mapper understands: a
/// dotted-path pointer (`a.b.c`, `a.0.b`) into the payload for each field.
#[derive(Debug, Clone, Deserialize)]
pub struct SpaApiContract {
    pub title_path: String,
    pub text_path: String,
    pub url_path: Option<String>,
    pub published_at_path: Option<String>,
}

fn pointer_get<'a>(value: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in dotted_path.split('.') {
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment)?,
        };
    }
    Some(current)
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub fn extract(
    url: &str,
    body: &[u8],
    contract: &SpaApiContract,
) -> Result<ExtractedCandidate, ContentError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| ContentError::Unparseable(e.to_string()))?;

    let title = as_text(pointer_get(&payload, &contract.title_path));
    let clean_text = as_text(pointer_get(&payload, &contract.text_path));
    super::require_nonempty_text(&clean_text)?;

    let canonical_url = contract
        .url_path
        .as_ref()
        .and_then(|p| pointer_get(&payload, p))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let published_at = contract
        .published_at_path
        .as_ref()
        .and_then(|p| pointer_get(&payload, p))
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc));

    let hash = content_hash(&[&title, &clean_text]);

    Ok(ExtractedCandidate {
        url: url.to_string(),
        content_hash: hash,
        clean_text,
        title,
        lang: None,
        canonical_url,
        published_at,
        modified_at: None,
    })
}
