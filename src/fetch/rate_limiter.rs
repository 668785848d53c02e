//! Per-domain concurrency limit and per-minute request rate (§4.3).
//!
//! Exceeding either parks the job with backoff; the caller (pool worker)
//! re-enqueues rather than blocking the fast path. Keyed per domain in a
//! concurrent map, mirroring the circuit breaker's "no process-local
//! singleton" posture (§9); this is the in-process stand-in for the
//! `redis`-backed counters used across replicas (§5).

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct DomainState {
    in_flight: u32,
    request_times: VecDeque<Instant>,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            in_flight: 0,
            request_times: VecDeque::new(),
        }
    }
}

pub struct DomainRateLimiter {
    states: DashMap<String, DomainState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    ConcurrencyExceeded,
    RateExceeded,
}

impl DomainRateLimiter {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Attempts to admit one request for `domain`. On `Allowed`, the caller
    /// must call [`Self::release`] once the request completes.
    pub fn try_admit(&self, domain: &str, concurrency_limit: u32, rate_per_min: u32) -> Admission {
        let mut state = self.states.entry(domain.to_string()).or_default();

        let now = Instant::now();
        let window = Duration::from_secs(60);
        while let Some(&front) = state.request_times.front() {
            if now.duration_since(front) > window {
                state.request_times.pop_front();
            } else {
                break;
            }
        }

        if state.in_flight >= concurrency_limit {
            return Admission::ConcurrencyExceeded;
        }
        if state.request_times.len() as u32 >= rate_per_min {
            return Admission::RateExceeded;
        }

        state.in_flight += 1;
        state.request_times.push_back(now);
        Admission::Allowed
    }

    pub fn release(&self, domain: &str) {
        if let Some(mut state) = self.states.get_mut(domain) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_under_concurrency_limit() {
        let limiter = DomainRateLimiter::new();
        assert_eq!(limiter.try_admit("a.gov.br", 2, 100), Admission::Allowed);
        assert_eq!(limiter.try_admit("a.gov.br", 2, 100), Admission::Allowed);
        assert_eq!(
            limiter.try_admit("a.gov.br", 2, 100),
            Admission::ConcurrencyExceeded
        );
    }

    #[test]
    fn release_frees_a_concurrency_slot() {
        let limiter = DomainRateLimiter::new();
        limiter.try_admit("a.gov.br", 1, 100);
        assert_eq!(
            limiter.try_admit("a.gov.br", 1, 100),
            Admission::ConcurrencyExceeded
        );
        limiter.release("a.gov.br");
        assert_eq!(limiter.try_admit("a.gov.br", 1, 100), Admission::Allowed);
    }

    #[test]
    fn enforces_per_minute_rate() {
        let limiter = DomainRateLimiter::new();
        for _ in 0..3 {
            assert_eq!(limiter.try_admit("a.gov.br", 10, 3), Admission::Allowed);
            limiter.release("a.gov.br");
        }
        assert_eq!(limiter.try_admit("a.gov.br", 10, 3), Admission::RateExceeded);
    }
}
