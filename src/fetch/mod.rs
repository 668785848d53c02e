//! C3 — Fetcher (§4.3): three pools, each with its own concurrency budget
//! and SLA, sharing the cross-cutting contracts (SSRF guard, per-domain
//! rate limiting, body cap, circuit breaker, `FetchAttempt` recording).

pub mod circuit_breaker;
pub mod deep;
pub mod fast;
pub mod rate_limiter;
pub mod render;
pub mod ssrf;

use crate::error::{PolicyError, TransportError};
use crate::model::{FetchAttempt, FetchErrorClass, Pool, Snapshot};
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

/// What a pool handed back, independent of which pool produced it.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 2xx with a body that was actually read.
    Fresh { body: Vec<u8>, headers: Vec<(String, String)>, status: u16 },
    /// 304 Not Modified: zero bytes, no snapshot (§4.3, §8 invariant 1).
    NotModified,
    Failed(FetchFailure),
}

#[derive(Debug)]
pub enum FetchFailure {
    Transport(TransportError),
    Http { status: u16, retryable: bool },
    Policy(PolicyError),
}

impl FetchFailure {
    pub fn error_class(&self) -> FetchErrorClass {
        match self {
            FetchFailure::Transport(_) => FetchErrorClass::Transport,
            FetchFailure::Http { .. } => FetchErrorClass::Http,
            FetchFailure::Policy(_) => FetchErrorClass::Policy,
        }
    }
}

/// Shared per-fetch context every pool needs: the max body size, an
/// optional conditional-request fingerprint, and the institutional UA.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub source_id: String,
    pub user_agent: String,
    pub max_bytes: u64,
    pub timeout: Duration,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Builds the `FetchAttempt` row for any outcome, including 304s, so
/// invariant 1 (§8) always has a record to point at.
pub fn record_attempt(
    pool: Pool,
    request: &FetchRequest,
    status: Option<u16>,
    error_class: FetchErrorClass,
    latency: Duration,
    bytes_read: u64,
    snapshot: Option<&Snapshot>,
) -> FetchAttempt {
    FetchAttempt {
        attempt_id: Uuid::new_v4(),
        source_id: request.source_id.clone(),
        url: request.url.clone(),
        status_code: status,
        error_class,
        latency_ms: latency.as_millis() as u64,
        bytes_read,
        pool,
        snapshot_hash: snapshot.map(|s| s.content_hash.clone()),
        attempted_at: Utc::now(),
    }
}

/// Builds the immutable [`Snapshot`] for a freshly read 2xx body, content
/// addressed by a sha256 hash of the raw bytes.
pub fn make_snapshot(url: &str, body: &[u8], headers: Vec<(String, String)>, blob_ref: String) -> Snapshot {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    let content_hash = hex::encode(hasher.finalize());
    Snapshot {
        content_hash,
        url: url.to_string(),
        headers,
        blob_ref,
        byte_len: body.len() as u64,
        fetched_at: Utc::now(),
    }
}
