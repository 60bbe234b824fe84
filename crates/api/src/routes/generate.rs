//! AI generation endpoint
//!
//! The canonical two-phase flow: advisory check before the provider call,
//! authoritative consume after it. A denial at consume time discards the
//! generated text and charges nothing; the window between the phases is
//! deliberate, no lock spans the provider call.

use axum::{
    extract::{Extension, State},
    Json,
};
use leadpilot_entitlement::{GateDecision, OperationKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::workspace_for;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_PROMPT_CHARS: usize = 4_000;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_tone")]
    pub tone: String,
}

fn default_tone() -> String {
    "professional".to_string()
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub generation: String,
    pub remaining: leadpilot_shared::Limit,
}

pub async fn generate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::Validation("prompt must not be empty".to_string()));
    }
    if req.prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ApiError::Validation(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }

    let workspace_id = workspace_for(&state.pool, &user).await?;

    // Cheap advisory check before paying for the provider call.
    if let GateDecision::Deny(reason) = state
        .gate
        .check_limits(workspace_id, OperationKind::AiGeneration, None)
        .await?
    {
        return Err(ApiError::LimitExceeded { reason });
    }

    let generation = state.ai.generate(&req.prompt, &req.tone).await?;

    // The authoritative charge. If the balance moved under us the result is
    // discarded and the caller sees the limit error.
    let outcome = state
        .gate
        .consume(
            workspace_id,
            Some(user.user_id),
            OperationKind::AiGeneration,
            None,
            Some(json!({ "tone": req.tone })),
        )
        .await?;

    Ok(Json(GenerateResponse {
        generation,
        remaining: outcome.credits_remaining,
    }))
}
