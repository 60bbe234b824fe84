//! Credit deduction and usage log endpoints

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use leadpilot_entitlement::{OperationKind, UsageLog, MAX_COST};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workspace_for;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Operation kind, e.g. "deep_scrape"
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct DeductResponse {
    pub success: bool,
    pub credits: CreditsView,
}

#[derive(Debug, Serialize)]
pub struct CreditsView {
    pub used: u64,
    pub remaining: leadpilot_shared::Limit,
}

/// Charge an operation at its default cost.
pub async fn deduct(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<DeductRequest>,
) -> ApiResult<Json<DeductResponse>> {
    let kind: OperationKind = req.kind.parse().map_err(ApiError::BadRequest)?;

    let workspace_id = workspace_for(&state.pool, &user).await?;
    let outcome = state
        .gate
        .consume(workspace_id, Some(user.user_id), kind, None, None)
        .await?;

    Ok(Json(DeductResponse {
        success: true,
        credits: CreditsView {
            used: outcome.credits_used,
            remaining: outcome.credits_remaining,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UseCreditsRequest {
    pub cost: u64,
    pub action_type: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct UseCreditsResponse {
    pub success: bool,
    pub remaining: leadpilot_shared::Limit,
}

/// Charge an operation at an explicit cost.
pub async fn use_credits(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UseCreditsRequest>,
) -> ApiResult<Json<UseCreditsResponse>> {
    let kind: OperationKind = req.action_type.parse().map_err(ApiError::BadRequest)?;
    if req.cost == 0 || req.cost > MAX_COST {
        return Err(ApiError::Validation(format!(
            "cost must be between 1 and {MAX_COST}"
        )));
    }

    let workspace_id = workspace_for(&state.pool, &user).await?;
    let outcome = state
        .gate
        .consume(
            workspace_id,
            Some(user.user_id),
            kind,
            Some(req.cost),
            req.metadata,
        )
        .await?;

    Ok(Json(UseCreditsResponse {
        success: true,
        remaining: outcome.credits_remaining,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UsageLogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Recent charge records for the caller's workspace.
pub async fn usage_logs(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<UsageLogsQuery>,
) -> ApiResult<Json<Vec<UsageLog>>> {
    let workspace_id = workspace_for(&state.pool, &user).await?;
    let logs = state.usage_logger.recent(workspace_id, query.limit).await?;
    Ok(Json(logs))
}
