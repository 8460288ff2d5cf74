//! Chat Routes
//!
//! API endpoints for the conversational query pipeline.

use crate::error::AppError;
use crate::models::{MessageResponse, SuccessResponse};
use crate::session::Turn;
use crate::state::SharedState;
use crate::workflow::WorkflowResult;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub result: WorkflowResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Run one question through the workflow for a session. Unknown session ids
/// are created transparently.
pub async fn handle_chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<SuccessResponse<ChatResponse>>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let result = state
        .engine
        .handle_chat(&request.session_id, &request.message)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Request processed",
        ChatResponse { result },
    )))
}

/// Ordered turn history for a session (empty for unknown sessions)
pub async fn get_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<SuccessResponse<HistoryResponse>>, AppError> {
    let turns = state.engine.history(&session_id).await?;

    Ok(Json(SuccessResponse::with_data(
        "History retrieved",
        HistoryResponse { session_id, turns },
    )))
}

/// Drop all turns for a session
pub async fn clear_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.engine.clear(&session_id).await?;
    Ok(Json(MessageResponse::new("Session history cleared")))
}
