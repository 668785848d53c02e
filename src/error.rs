//! Error taxonomy (§7): kinds, not language-specific exception types.
//!
//! Internal modules return these typed errors; orchestration code (the
//! scheduler loop, `main.rs`) collapses them into `anyhow::Result`, the same
//! split the teacher uses between its scrapers (typed/anyhow) and `main.rs`
//! (`anyhow::Result<()>` end to end).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dns resolution failed for {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssrf guard blocked {host}: resolved address {addr} is not publicly routable")]
    SsrfBlocked { host: String, addr: String },
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
#[error("http {status}")]
pub struct HttpError {
    pub status: u16,
    pub retryable: bool,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        // 408/429 back off and retry; the rest of 4xx surfaces without retry (§7).
        let retryable = status == 408 || status == 429 || (500..600).contains(&status);
        Self { status, retryable }
    }
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("unparseable body: {0}")]
    Unparseable(String),
    #[error("zero-length text after extraction")]
    EmptyText,
    #[error("encoding failure: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("ssrf guard rejected host {0}")]
    Ssrf(String),
    #[error("per-domain rate limit exceeded for {0}")]
    RateLimited(String),
    #[error("body exceeded max_bytes cap of {0}")]
    BodyCapExceeded(u64),
    #[error("circuit breaker open for source {0}")]
    CircuitOpen(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("broker error: {0}")]
    Broker(String),
}

#[derive(Debug, Error)]
pub enum LogicError {
    #[error("cannot merge event {0} into itself")]
    SelfMerge(uuid::Uuid),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("feedback action {action:?} not permitted in state {state:?}")]
    ActionNotPermitted {
        action: crate::model::FeedbackAction,
        state: crate::model::EventStatus,
    },
}

/// Top-level aggregate used at component boundaries (§7).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Logic(#[from] LogicError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
