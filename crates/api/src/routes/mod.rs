//! API routes

pub mod credits;
pub mod generate;
pub mod health;
pub mod plan;
pub mod system;
pub mod webhooks;
pub mod workspaces;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use leadpilot_shared::WorkspaceId;
use sqlx::{PgPool, Row};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{require_auth, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Workspace the caller acts in, derived from membership. Earliest joined
/// membership wins as the default workspace.
pub async fn workspace_for(pool: &PgPool, user: &AuthUser) -> ApiResult<WorkspaceId> {
    let row = sqlx::query(
        r#"
        SELECT workspace_id FROM workspace_members
        WHERE user_id = $1
        ORDER BY joined_at ASC
        LIMIT 1
        "#,
    )
    .bind(user.user_id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NoWorkspace)?;

    let id: uuid::Uuid = row.try_get("workspace_id")?;
    Ok(WorkspaceId(id))
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let protected_api = Router::new()
        .route("/plan-data", get(plan::plan_data))
        .route("/credits/deduct", post(credits::deduct))
        .route("/credits/use", post(credits::use_credits))
        .route("/usage/logs", get(credits::usage_logs))
        .route("/ai/generate", post(generate::generate))
        .route("/workspaces", post(workspaces::create_workspace))
        .route("/workspace", get(workspaces::current_workspace))
        .route("/workspace/members", get(workspaces::list_members))
        .route(
            "/workspace/members/:user_id",
            delete(workspaces::remove_member),
        )
        .route("/workspace/invites", post(workspaces::create_invite))
        .route(
            "/workspace/invites/accept",
            post(workspaces::accept_invite),
        )
        .route(
            "/workspace/transfer-ownership",
            post(workspaces::transfer_ownership),
        )
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(health_routes)
        .route("/system/resetCredits", get(system::reset_credits))
        .route("/webhooks/payment", post(webhooks::payment))
        .nest("/api/v1", protected_api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
