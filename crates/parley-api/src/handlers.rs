//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path parameters or the JSON body via axum
//! extractors, calls the pipelines and the conversation store held in
//! AppState, and returns JSON responses.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use parley_core::types::{distinct_sources, ConversationSummary, Role};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

/// Request body for POST /chat.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

impl ChatRequest {
    /// Both fields must be non-blank.
    fn validate(&self) -> Result<(), ApiError> {
        if self.session_id.trim().is_empty() {
            return Err(ApiError::UnprocessableEntity(
                "session_id must not be empty".to_string(),
            ));
        }
        if self.message.trim().is_empty() {
            return Err(ApiError::UnprocessableEntity(
                "message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    /// Distinct document titles, first-seen order.
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /chat - answer a message within a session and store the turn.
///
/// History is read before the pipelines run and the new turn is written only
/// after an answer exists, so a failed call stores nothing.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let session_id = request.session_id.as_str();
    let history = state.store.list(session_id)?;
    debug!(session_id, history = history.len(), "Chat request");

    let retrieval = state
        .retrieval
        .retrieve(&request.message, &history)
        .await
        .map_err(|e| {
            error!(session_id, error = %e, "Retrieval failed");
            ApiError::from(e)
        })?;

    let answer = state
        .answer
        .answer(&request.message, &history, &retrieval.documents)
        .await
        .map_err(|e| {
            error!(session_id, error = %e, "Answer generation failed");
            ApiError::from(e)
        })?;

    state
        .store
        .append_turn(session_id, &request.message, &answer)?;

    let sources = distinct_sources(&retrieval.documents);
    info!(
        session_id,
        documents = retrieval.documents.len(),
        sources = sources.len(),
        "Chat turn completed"
    );

    Ok(Json(ChatResponse { answer, sources }))
}

/// GET /history/{session_id} - messages of a session in order.
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let messages = state.store.list(&session_id)?;
    Ok(Json(
        messages
            .into_iter()
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content,
            })
            .collect(),
    ))
}

/// GET /conversations - every non-empty session, most recent first.
pub async fn conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.store.list_conversations()?))
}

/// POST /reset/{session_id} - delete a session's messages.
pub async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let removed = state.store.delete_all(&session_id)?;
    info!(session_id = %session_id, removed, "Session reset");
    Ok(Json(ResetResponse {
        status: "reset".to_string(),
        session_id,
    }))
}

/// GET /health - liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("No such endpoint".to_string())
}
