//! RENDER pool (§4.3): `SPA_API` (call the configured JSON endpoint) or
//! `SPA_HEADLESS` (headless browser with asset blocking). Target end-to-end
//! fetch <= 15s.
//!
//! No headless-browser crate appears anywhere in the retrieved corpus, so
//! `SPA_HEADLESS` is modeled behind [`HeadlessRenderer`]: a seam a real
//! browser-automation backend plugs into. [`HttpFallbackRenderer`] is the
//! shipped implementation — it fetches the page HTML directly, which is
//! exactly the fallback path the spec already names ("page HTML is a
//! fallback") when XHR capture isn't available.

use super::fast;
use super::{FetchOutcome, FetchRequest};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// `SPA_API`: the JSON endpoint is just another FAST-shaped GET, reusing
/// the same SSRF guard and capped streaming read.
pub async fn fetch_spa_api(client: &Client, request: &FetchRequest) -> (Duration, FetchOutcome) {
    fast::fetch(client, request).await
}

#[async_trait]
pub trait HeadlessRenderer: Send + Sync {
    /// Returns the captured XHR/JSON payloads (primary) or, if none were
    /// captured, the raw page HTML (fallback).
    async fn render(&self, client: &Client, request: &FetchRequest) -> (Duration, FetchOutcome);
}

pub struct HttpFallbackRenderer;

#[async_trait]
impl HeadlessRenderer for HttpFallbackRenderer {
    async fn render(&self, client: &Client, request: &FetchRequest) -> (Duration, FetchOutcome) {
        fast::fetch(client, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn http_fallback_renderer_delegates_to_plain_fetch() {
        let client = Client::new();
        let request = FetchRequest {
            url: "http://127.0.0.1:1/spa".to_string(),
            source_id: "s".to_string(),
            user_agent: "test-agent".to_string(),
            max_bytes: 1_000_000,
            timeout: StdDuration::from_millis(100),
            etag: None,
            last_modified: None,
        };
        let renderer = HttpFallbackRenderer;
        let (_, outcome) = renderer.render(&client, &request).await;
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
    }
}
