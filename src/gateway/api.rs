//! HTTP handlers for the browser game client.
//!
//! Field names follow the client's camelCase JSON. `/chat` streams
//! server-sent events; every other route answers with one JSON document.

use super::{error::ApiError, AppState};
use crate::agent::{TurnEvent, TurnRequest};
use crate::events::{EventChoiceRequest, RandomEventRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;

const DEFAULT_SESSION_ID: &str = "default";

// ── Request bodies ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatBody {
    pub message: String,
    pub session_id: Option<String>,
    pub event_context: String,
    pub is_initial: bool,
}

impl ChatBody {
    fn into_turn_request(self) -> TurnRequest {
        TurnRequest {
            session_id: session_or_default(self.session_id),
            message: self.message,
            event_context: self.event_context,
            is_initial: self.is_initial,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetBody {
    pub session_id: Option<String>,
}

/// An omitted (or null) id means the shared default session. Any string,
/// including an empty one, names its own session.
fn session_or_default(id: Option<String>) -> String {
    id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string())
}

fn turn_event_to_sse(event: &TurnEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|err| {
        tracing::error!("Failed to encode stream event: {err}");
        Event::default().data(r#"{"error":"failed to encode stream event"}"#)
    })
}

// ── Conversation ────────────────────────────────────────────────

/// POST /chat: run one conversation turn and stream it as SSE.
pub async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(body) = body?;
    let request = body.into_turn_request();
    tracing::info!(
        session_id = %request.session_id,
        is_initial = request.is_initial,
        message_chars = request.message.chars().count(),
        "Chat turn requested"
    );

    let events = state
        .orchestrator
        .handle_turn(request)
        .map(|event| Ok(turn_event_to_sse(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /reset-game: replace a session with a fresh one.
pub async fn handle_reset_game(
    State(state): State<AppState>,
    body: Result<Json<ResetBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let session_id = session_or_default(body.session_id);
    state.orchestrator.store().reset(&session_id).await?;
    tracing::info!(session_id = %session_id, "Game reset");
    Ok(Json(json!({ "success": true })))
}

/// GET /api/sessions: ids of every live session.
pub async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.orchestrator.store().list_ids().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// GET /api/sessions/{id}: current session state.
pub async fn handle_session_snapshot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.store().snapshot(&session_id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::NotFound(format!("Session not found: {session_id}"))),
    }
}

// ── Events ──────────────────────────────────────────────────────

/// POST /random-event: generate a random encounter for the current state.
pub async fn handle_random_event(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let request = RandomEventRequest::from_json(&body)?;
    let event = state.events.random_event(&request).await?;
    Ok(Json(event))
}

/// POST /event-choice: narrate the outcome of accepting or declining an event.
pub async fn handle_event_choice(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let request = EventChoiceRequest::from_json(&body)?;
    let outcome = state.events.event_choice(&request).await?;
    Ok(Json(outcome))
}

// ── Stats (echo only) ───────────────────────────────────────────

fn submitted_amount(body: &Value) -> Value {
    body.get("amount").cloned().unwrap_or(Value::Null)
}

/// POST /api/game/update_money: acknowledge a money change.
pub async fn handle_update_money(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    Ok(Json(json!({
        "success": true,
        "new_balance": submitted_amount(&body),
    })))
}

/// POST /api/game/update_reputation: acknowledge a reputation change.
pub async fn handle_update_reputation(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    Ok(Json(json!({
        "success": true,
        "new_reputation": submitted_amount(&body),
    })))
}

// ── Status ──────────────────────────────────────────────────────

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.started_at;
    Json(json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": uptime.num_seconds(),
        "sessions": state.orchestrator.store().len(),
        "provider": state.orchestrator.provider().name(),
        "model": state.orchestrator.settings().model,
    }))
}
