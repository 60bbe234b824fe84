//! Scheduled system endpoints

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct ResetCreditsResponse {
    pub scanned: u64,
    pub processed: u64,
    pub failed: usize,
}

/// Billing-cycle sweep, invoked by the external cron as a backstop to the
/// worker's schedule. Guarded by `CRON_SECRET`, not user auth.
pub async fn reset_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ResetCreditsResponse>> {
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-cron-secret").and_then(|v| v.to_str().ok()))
        .ok_or(ApiError::Unauthorized)?;

    let matches: bool = provided
        .as_bytes()
        .ct_eq(state.config.cron_secret.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized);
    }

    let outcome = state.resetter.sweep(OffsetDateTime::now_utc()).await?;

    Ok(Json(ResetCreditsResponse {
        scanned: outcome.scanned,
        processed: outcome.reset,
        failed: outcome.failed.len(),
    }))
}
