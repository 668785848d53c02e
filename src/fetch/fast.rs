//! FAST pool (§4.3): HTTP GET with conditional headers, target end-to-end
//! fetch <= 2s. Used by `RSS`/`HTML`/`API` strategies.

use super::{ssrf, FetchFailure, FetchOutcome, FetchRequest};
use crate::error::TransportError;
use futures_util::StreamExt;
use reqwest::{Client, Url};
use std::time::Instant;

/// Streams the response body, truncating at `max_bytes` (§4.3 "body cap at
/// `max_bytes` with streaming truncation").
async fn read_capped_body(
    response: reqwest::Response,
    max_bytes: u64,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = max_bytes.saturating_sub(body.len() as u64);
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len() as u64) as usize;
        body.extend_from_slice(&chunk[..take]);
        if body.len() as u64 >= max_bytes {
            break;
        }
    }
    Ok(body)
}

/// Performs one FAST-pool fetch: SSRF guard, conditional headers, capped
/// streaming read. Does not itself consult the circuit breaker or rate
/// limiter — callers (the scheduler's pool worker loop) own that sequencing
/// so the guard logic stays independently testable.
pub async fn fetch(client: &Client, request: &FetchRequest) -> (std::time::Duration, FetchOutcome) {
    let started = Instant::now();

    let parsed = match Url::parse(&request.url) {
        Ok(url) => url,
        Err(_) => {
            return (
                started.elapsed(),
                FetchOutcome::Failed(FetchFailure::Transport(TransportError::Tls(
                    "unparseable url".to_string(),
                ))),
            )
        }
    };
    let Some(host) = parsed.host_str() else {
        return (
            started.elapsed(),
            FetchOutcome::Failed(FetchFailure::Transport(TransportError::Tls(
                "url has no host".to_string(),
            ))),
        );
    };
    let port = parsed.port_or_known_default().unwrap_or(443);

    if let Err(err) = ssrf::guard(host, port).await {
        return (started.elapsed(), FetchOutcome::Failed(FetchFailure::Transport(err)));
    }

    let mut builder = client
        .get(&request.url)
        .header("User-Agent", &request.user_agent)
        .timeout(request.timeout);
    if let Some(etag) = &request.etag {
        builder = builder.header("If-None-Match", etag);
    }
    if let Some(last_modified) = &request.last_modified {
        builder = builder.header("If-Modified-Since", last_modified);
    }

    let response = match builder.send().await {
        Ok(resp) => resp,
        Err(err) => {
            return (
                started.elapsed(),
                FetchOutcome::Failed(FetchFailure::Transport(TransportError::Network(err))),
            )
        }
    };

    let status = response.status().as_u16();
    if status == 304 {
        return (started.elapsed(), FetchOutcome::NotModified);
    }
    if !response.status().is_success() {
        let retryable = status == 408 || status == 429 || (500..600).contains(&status);
        return (
            started.elapsed(),
            FetchOutcome::Failed(FetchFailure::Http { status, retryable }),
        );
    }

    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let body = match read_capped_body(response, request.max_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return (
                started.elapsed(),
                FetchOutcome::Failed(FetchFailure::Transport(TransportError::Network(err))),
            )
        }
    };

    (started.elapsed(), FetchOutcome::Fresh { body, headers, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blocks_loopback_target_via_ssrf_guard() {
        let client = Client::new();
        let request = FetchRequest {
            url: "http://127.0.0.1:1/anything".to_string(),
            source_id: "s".to_string(),
            user_agent: "test-agent".to_string(),
            max_bytes: 1_000_000,
            timeout: Duration::from_secs(1),
            etag: None,
            last_modified: None,
        };
        let (_, outcome) = fetch(&client, &request).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchFailure::Transport(TransportError::SsrfBlocked { .. }))
        ));
    }
}
