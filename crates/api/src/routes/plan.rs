//! Entitlement snapshot endpoint

use axum::{
    extract::{Extension, State},
    Json,
};
use leadpilot_entitlement::EntitlementSnapshot;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Full entitlement snapshot for the caller's workspace: plan, limits,
/// current usage, remaining headroom, and the next reset time.
pub async fn plan_data(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<EntitlementSnapshot>> {
    let snapshot = state.resolver.resolve(user.user_id).await?;
    Ok(Json(snapshot))
}
