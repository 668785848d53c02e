//! DEEP pool (§4.3): retrieves PDFs/gazettes. No end-to-end SLA; must never
//! block the fast path — callers dispatch DEEP jobs on their own worker
//! pool, never awaited inline from the FAST/RENDER critical path.

use super::fast;
use super::{FetchOutcome, FetchRequest};
use reqwest::Client;
use std::time::Duration;

/// A DEEP-pool fetch is structurally identical to a FAST fetch (same SSRF
/// guard, same capped streaming read) — only the timeout budget and the
/// downstream strategy (`PDF`) differ, which is why this is a thin wrapper
/// rather than a parallel implementation.
pub async fn fetch(client: &Client, request: &FetchRequest) -> (Duration, FetchOutcome) {
    fast::fetch(client, request).await
}
