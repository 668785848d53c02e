//! HTTP + WebSocket surface: live event stream and the editorial feedback
//! endpoint, the same thin-handler-delegates-to-pure-function shape as the
//! teacher's `api/routes.rs` (`AxumState<AppState>` plus a `Json<...>`
//! response per handler).

use crate::alerts::{AlertDispatcher, StateTransitionOccurred};
use crate::broadcast::{self, Broadcaster};
use crate::db::Db;
use crate::engine::EventEngine;
use crate::feedback::{self, FeedbackEffect, FeedbackRejection};
use crate::model::{EventId, EventStatus, FeedbackAction};
use crate::organizer::merge::MergePlan;
use crate::organizer::ClusterIndex;
use crate::scheduler::Scheduler;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared process state handed to every handler, grounded on the teacher's
/// `AppState` (a bag of `Arc`-wrapped subsystems cloned per request).
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub broadcaster: Arc<Broadcaster>,
    pub alert_dispatcher: Arc<AlertDispatcher>,
    pub cluster_index: Arc<ClusterIndex>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<EventEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/events/live", get(live_stream))
        .route("/v1/events/:event_id", get(get_event))
        .route("/v1/events/:event_id/feedback", post(submit_feedback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_event(State(state): State<AppState>, Path(event_id): Path<EventId>) -> impl IntoResponse {
    match state.db.get_event(event_id) {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(error = %err, %event_id, "failed to load event");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Upgrades to the live WebSocket feed (§4.10), replaying recent activity
/// then streaming every subsequent broadcast message.
async fn live_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| broadcast::handle_socket(socket, state.broadcaster.clone()))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub action: FeedbackAction,
    #[serde(default = "serde_json::Value::default")]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: uuid::Uuid,
    pub effect: String,
}

impl IntoResponse for FeedbackRejection {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            FeedbackRejection::EventNotFound(_) => StatusCode::NOT_FOUND,
            FeedbackRejection::ActionNotPermitted => StatusCode::CONFLICT,
            FeedbackRejection::MissingMergeTarget | FeedbackRejection::EmptySplitPayload => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Handles an editorial action against an Event (§4.12): loads current
/// state, validates+applies via [`feedback::handle`], persists, and carries
/// out the resulting effect (status transition, canonicalisation, or split).
async fn submit_feedback(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(request): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let current = match state.db.get_event(event_id) {
        Ok(Some(event)) => event,
        Ok(None) => return FeedbackRejection::EventNotFound(event_id).into_response(),
        Err(err) => {
            error!(error = %err, %event_id, "failed to load event for feedback");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (feedback, effect) = match feedback::handle(event_id, current.status, request.action, &request.payload) {
        Ok(result) => result,
        Err(rejection) => return rejection.into_response(),
    };

    if let Err(err) = state.db.insert_feedback_event(&feedback) {
        error!(error = %err, %event_id, "failed to persist feedback event");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let effect_label = match &effect {
        FeedbackEffect::Transition(_) => {
            if let Err(err) = apply_editorial_ignore(&state, event_id, current.status, current.last_seen_at) {
                error!(error = %err, %event_id, "failed to apply feedback transition");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            "transition"
        }
        FeedbackEffect::CanonicalizeInto { target_event_id } => {
            let plan = MergePlan { canonical_event_id: *target_event_id, followers: vec![event_id] };
            if let Err(err) = state.engine.canonicalize(&plan, None, Utc::now()) {
                error!(error = %err, %event_id, target_event_id = %target_event_id, "failed to canonicalize event");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            "canonicalize"
        }
        FeedbackEffect::SplitIntoNewEvent { doc_ids } => {
            match state.engine.split(event_id, doc_ids, Utc::now()) {
                Ok(Some(_new_event_id)) => "split",
                Ok(None) => {
                    warn!(%event_id, "split requested against an event that no longer exists");
                    return StatusCode::NOT_FOUND.into_response();
                }
                Err(err) => {
                    error!(error = %err, %event_id, doc_count = doc_ids.len(), "failed to split event");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
        FeedbackEffect::NoTransition => "none",
    };

    Json(FeedbackResponse { feedback_id: feedback.feedback_id, effect: effect_label.to_string() }).into_response()
}

fn apply_editorial_ignore(
    state: &AppState,
    event_id: EventId,
    from: EventStatus,
    expected_last_seen_at: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    state
        .db
        .update_status_optimistic(event_id, expected_last_seen_at, EventStatus::Ignored, now)
        .ok();
    state.db.append_state_history(&crate::model::EventStateHistory {
        event_id,
        status: EventStatus::Ignored,
        reason_code: "EDITORIAL_IGNORE".to_string(),
        at: now,
    })?;
    let transition = StateTransitionOccurred { event_id, from, to: EventStatus::Ignored };
    state.alert_dispatcher.evaluate(&transition, now);
    Ok(())
}
