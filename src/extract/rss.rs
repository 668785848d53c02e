//! `RSS` strategy (§4.4): each feed entry becomes a candidate Document with
//! `per-item content hash = hash(title || link || summary-or-content)`.
//! Entries without a resolvable link are discarded.

use super::{content_hash, ExtractedCandidate};
use crate::error::ContentError;
use chrono::{DateTime, Utc};
use feed_rs::parser;

pub fn extract(body: &[u8]) -> Result<Vec<ExtractedCandidate>, ContentError> {
    let feed = parser::parse(body).map_err(|e| ContentError::Unparseable(e.to_string()))?;

    let mut candidates = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
            // Entries without a resolvable link are discarded (§4.4).
            continue;
        };

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let summary_or_content = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();

        let hash = content_hash(&[&title, &link, &summary_or_content]);
        let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);

        candidates.push(ExtractedCandidate {
            url: link.clone(),
            content_hash: hash,
            clean_text: summary_or_content,
            title,
            lang: None,
            canonical_url: Some(link),
            published_at,
            modified_at: entry.updated,
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Diario Oficial</title>
    <item>
      <title>Decreto 11.555/2025</title>
      <link>https://in.gov.br/decreto-11555</link>
      <description>Abre credito extraordinario de R$ 4.500.000.000,00.</description>
    </item>
    <item>
      <title>Item sem link</title>
      <description>Nao deve ser extraido.</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn extracts_entries_with_links_and_skips_those_without() {
        let candidates = extract(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://in.gov.br/decreto-11555");
        assert!(candidates[0].clean_text.contains("4.500.000.000"));
    }

    #[test]
    fn same_content_yields_same_hash() {
        let a = extract(SAMPLE_RSS.as_bytes()).unwrap();
        let b = extract(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(a[0].content_hash, b[0].content_hash);
    }
}
