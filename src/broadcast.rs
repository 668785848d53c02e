//! C10 — Event Broadcaster (§4.10).
//!
//! Live stream of Event activity over WebSocket, grounded directly on the
//! teacher's `websocket_handler`/`handle_socket` pair in `main.rs`: a
//! `tokio::sync::broadcast` channel fanned out to every connection, with new
//! connections replayed recent state first. Delivery is best-effort
//! at-most-once per connection; per-Event ordering is preserved by
//! serialising publish through a single sequence counter per `event_id`
//! rather than relying on broadcast-channel ordering across events.

use crate::model::{Anchor, EventFlag, EventId, EventStatus};
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsServerEvent {
    EventUpsert {
        event_id: EventId,
        seq: u64,
        status: EventStatus,
        summary: String,
        lane: String,
        score_plantao: f64,
        score_oceano_azul: f64,
        reasons: serde_json::Value,
        anchors: Vec<Anchor>,
        doc_count: u32,
        source_count: u32,
        first_seen_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
        flags: HashSet<EventFlag>,
    },
    EventStateChanged {
        event_id: EventId,
        seq: u64,
        previous_status: EventStatus,
        new_status: EventStatus,
        reason_code: String,
        at: DateTime<Utc>,
    },
    EventMerged {
        event_id: EventId,
        seq: u64,
        from_event_id: EventId,
        to_event_id: EventId,
        reason_code: String,
    },
}

impl WsServerEvent {
    fn event_id(&self) -> EventId {
        match self {
            WsServerEvent::EventUpsert { event_id, .. } => *event_id,
            WsServerEvent::EventStateChanged { event_id, .. } => *event_id,
            WsServerEvent::EventMerged { event_id, .. } => *event_id,
        }
    }
}

/// Per-event monotonic sequence counter, so every message carrying a given
/// `event_id` is strictly ordered even though the underlying broadcast
/// channel interleaves events freely (§4.10, §5 "per Event, state
/// transitions and broadcast messages are totally ordered").
#[derive(Default)]
pub struct SequenceCounters {
    counters: DashMap<EventId, u64>,
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, event_id: EventId) -> u64 {
        let mut entry = self.counters.entry(event_id).or_insert(0);
        *entry += 1;
        *entry
    }
}

/// Shared broadcaster state: the publish channel plus the recent-event
/// replay buffer handed to newly-connected clients, the same shape as the
/// teacher's `signal_broadcast` + `signal_storage.get_recent` pairing.
pub struct Broadcaster {
    sender: broadcast::Sender<WsServerEvent>,
    sequences: SequenceCounters,
    recent: parking_lot::Mutex<Vec<WsServerEvent>>,
    recent_capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize, recent_capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender,
            sequences: SequenceCounters::new(),
            recent: parking_lot::Mutex::new(Vec::with_capacity(recent_capacity)),
            recent_capacity,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsServerEvent> {
        self.sender.subscribe()
    }

    pub fn recent_snapshot(&self) -> Vec<WsServerEvent> {
        self.recent.lock().clone()
    }

    /// Stamps `event` with the next per-event sequence number and publishes
    /// it. A full receiver queue only drops the slowest consumer's own
    /// backlog (`broadcast::Sender::send` errors mean zero subscribers,
    /// which is not a failure here).
    pub fn publish(&self, mut event: WsServerEvent) {
        let seq = self.sequences.next(event.event_id());
        match &mut event {
            WsServerEvent::EventUpsert { seq: s, .. } => *s = seq,
            WsServerEvent::EventStateChanged { seq: s, .. } => *s = seq,
            WsServerEvent::EventMerged { seq: s, .. } => *s = seq,
        }

        {
            let mut recent = self.recent.lock();
            recent.push(event.clone());
            if recent.len() > self.recent_capacity {
                let overflow = recent.len() - self.recent_capacity;
                recent.drain(0..overflow);
            }
        }

        let _ = self.sender.send(event);
    }
}

/// Drives a single accepted WebSocket connection: replay-then-stream, the
/// same structure as the teacher's `handle_socket` (§4.10).
pub async fn handle_socket(mut socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let mut rx = broadcaster.subscribe();

    for event in broadcaster.recent_snapshot() {
        let msg = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        if socket.send(Message::Text(msg)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(event) => {
                        let msg = serde_json::to_string(&event).unwrap_or_else(|e| {
                            warn!(error = %e, "failed to serialize ws event");
                            "{}".to_string()
                        });
                        if socket.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
