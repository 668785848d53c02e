//! C9 — Alert Dispatcher (§4.9).
//!
//! Subscribes to state transitions and emits at most one external
//! notification per `(event_id, transition)`, deduplicated by a fingerprint
//! plus a per-event cooldown window. Never alerts on score crossings alone
//! — callers only ever feed this a `StateTransitionOccurred`.

use crate::model::{EventAlertState, EventId, EventStatus};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct StateTransitionOccurred {
    pub event_id: EventId,
    pub from: EventStatus,
    pub to: EventStatus,
}

fn fingerprint(transition: &StateTransitionOccurred) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transition.event_id.as_bytes());
    hasher.update(format!("{:?}->{:?}", transition.from, transition.to).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    Send,
    Suppressed,
}

/// Tracks per-event alert state across the process (mirrors the teacher's
/// `DataSourceKillSwitch` windowed bookkeeping, keyed by event instead of
/// by data source).
pub struct AlertDispatcher {
    states: DashMap<EventId, EventAlertState>,
    cooldown: Duration,
}

impl AlertDispatcher {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            states: DashMap::new(),
            cooldown,
        }
    }

    /// Decides whether `transition` should produce an external notification,
    /// updating the dedup state as a side effect when it does (§4.9).
    pub fn evaluate(&self, transition: &StateTransitionOccurred, now: DateTime<Utc>) -> DispatchDecision {
        let fp = fingerprint(transition);

        if let Some(existing) = self.states.get(&transition.event_id) {
            let same_fingerprint = existing.last_fingerprint == fp;
            let within_cooldown = now < existing.cooldown_until;
            if same_fingerprint && within_cooldown {
                return DispatchDecision::Suppressed;
            }
        }

        self.states.insert(
            transition.event_id,
            EventAlertState {
                event_id: transition.event_id,
                last_fingerprint: fp,
                last_alerted_at: now,
                cooldown_until: now + self.cooldown,
            },
        );
        DispatchDecision::Send
    }

    pub fn state_for(&self, event_id: EventId) -> Option<EventAlertState> {
        self.states.get(&event_id).map(|r| r.clone())
    }
}
