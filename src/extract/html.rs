//! `HTML` strategy (§4.4): main-content extraction from the raw body;
//! content hash = hash(clean text).

use super::{content_hash, ExtractedCandidate};
use crate::error::ContentError;
use scraper::{Html, Selector};

/// Candidate main-content selectors, tried in order of specificity. Real
/// sources vary wildly in markup; this is a pragmatic readability-lite pass
/// rather than a full boilerplate-removal model (out of scope per spec.md
/// §1 — content extraction is covered, ML-driven boilerplate detection is
/// not named at all and isn't worth the dependency weight here).
const CONTENT_SELECTORS: &[&str] = &["article", "main", "[role=main]", "body"];

fn selector(expr: &str) -> Selector {
    Selector::parse(expr).expect("static selector is always valid")
}

pub fn extract(url: &str, body: &[u8]) -> Result<ExtractedCandidate, ContentError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ContentError::Encoding(e.to_string()))?
        .to_string();
    let document = Html::parse_document(&text);

    let title = document
        .select(&selector("title"))
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let mut clean_text = String::new();
    for expr in CONTENT_SELECTORS {
        let sel = selector(expr);
        let collected: String = document
            .select(&sel)
            .flat_map(|n| n.text())
            .collect::<Vec<_>>()
            .join(" ");
        let collected = collected.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collected.trim().is_empty() {
            clean_text = collected;
            break;
        }
    }

    super::require_nonempty_text(&clean_text)?;

    let canonical_url = document
        .select(&selector(r#"link[rel="canonical"]"#))
        .next()
        .and_then(|n| n.value().attr("href"))
        .map(|s| s.to_string());

    let hash = content_hash(&[&clean_text]);

    Ok(ExtractedCandidate {
        url: url.to_string(),
        content_hash: hash,
        clean_text,
        title,
        lang: None,
        canonical_url,
        published_at: None,
        modified_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_article_body_and_title() {
        let html = br#"<html><head><title>Manchete</title></head>
            <body><nav>menu</nav><article>Texto principal da noticia.</article></body></html>"#;
        let candidate = extract("https://example.com/n/1", html).unwrap();
        assert_eq!(candidate.title, "Manchete");
        assert!(candidate.clean_text.contains("Texto principal"));
        assert!(!candidate.clean_text.contains("menu"));
    }

    #[test]
    fn rejects_empty_content() {
        let html = b"<html><head><title>Vazio</title></head><body></body></html>";
        assert!(extract("https://example.com/n/2", html).is_err());
    }
}
