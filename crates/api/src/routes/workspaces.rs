//! Workspace management endpoints
//!
//! Provisioning, membership, and invites. Seat-capped writes take the
//! workspace row lock first, the same order every entitlement writer uses.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use leadpilot_entitlement::{audit, DenyReason, LedgerStore, OperationKind, CYCLE_PERIOD};
use leadpilot_shared::{WorkspaceId, WorkspaceRole};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use super::workspace_for;
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const INVITE_TTL_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    pub id: Uuid,
    pub name: String,
    pub plan: String,
    pub owner_id: Uuid,
    pub next_reset: OffsetDateTime,
    pub member_count: i64,
}

/// Provision a workspace on the free plan with a fresh ledger period.
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<Json<WorkspaceResponse>> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation(
            "workspace name must be 1-100 characters".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let next_reset = now + CYCLE_PERIOD;
    let workspace_id = WorkspaceId::new();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO workspaces (id, name, owner_id, plan_id, next_reset)
        VALUES ($1, $2, $3, 'free', $4)
        "#,
    )
    .bind(workspace_id.0)
    .bind(name)
    .bind(user.user_id.0)
    .bind(next_reset)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, 'owner')",
    )
    .bind(workspace_id.0)
    .bind(user.user_id.0)
    .execute(&mut *tx)
    .await?;

    LedgerStore::start_period(&mut *tx, workspace_id, now.date(), next_reset).await?;

    tx.commit().await?;

    tracing::info!(workspace_id = %workspace_id, owner = %user.user_id, "workspace provisioned");

    Ok(Json(WorkspaceResponse {
        id: workspace_id.0,
        name: name.to_string(),
        plan: "free".to_string(),
        owner_id: user.user_id.0,
        next_reset,
        member_count: 1,
    }))
}

/// The caller's default workspace.
pub async fn current_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<WorkspaceResponse>> {
    let workspace_id = workspace_for(&state.pool, &user).await?;

    let row = sqlx::query(
        r#"
        SELECT
            w.name, w.owner_id, w.plan_id, w.next_reset,
            (SELECT COUNT(*) FROM workspace_members m WHERE m.workspace_id = w.id) AS member_count
        FROM workspaces w
        WHERE w.id = $1
        "#,
    )
    .bind(workspace_id.0)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(WorkspaceResponse {
        id: workspace_id.0,
        name: row.try_get("name")?,
        plan: row.try_get("plan_id")?,
        owner_id: row.try_get("owner_id")?,
        next_reset: row.try_get("next_reset")?,
        member_count: row.try_get("member_count")?,
    }))
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: WorkspaceRole,
    pub joined_at: OffsetDateTime,
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<MemberResponse>>> {
    let workspace_id = workspace_for(&state.pool, &user).await?;

    let rows = sqlx::query(
        r#"
        SELECT m.user_id, u.email, m.role, m.joined_at
        FROM workspace_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.workspace_id = $1
        ORDER BY m.joined_at ASC
        "#,
    )
    .bind(workspace_id.0)
    .fetch_all(&state.pool)
    .await?;

    let members = rows
        .into_iter()
        .map(|row| {
            Ok(MemberResponse {
                user_id: row.try_get("user_id")?,
                email: row.try_get("email")?,
                role: row.try_get("role")?,
                joined_at: row.try_get("joined_at")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Json(members))
}

async fn require_role(
    state: &AppState,
    workspace_id: WorkspaceId,
    user: &AuthUser,
    allowed: &[WorkspaceRole],
) -> ApiResult<WorkspaceRole> {
    let row = sqlx::query(
        "SELECT role FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
    )
    .bind(workspace_id.0)
    .bind(user.user_id.0)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::Forbidden)?;

    let role: WorkspaceRole = row.try_get("role")?;
    if !allowed.contains(&role) {
        return Err(ApiError::Forbidden);
    }
    Ok(role)
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub token: Uuid,
    pub email: String,
    pub expires_at: OffsetDateTime,
}

/// Invite by email. Denied with `MEMBER_LIMIT_REACHED` when the plan has no
/// free seats; the cap is re-checked at accept time, so an invite is never
/// a seat reservation.
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateInviteRequest>,
) -> ApiResult<Json<InviteResponse>> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }

    let workspace_id = workspace_for(&state.pool, &user).await?;
    require_role(
        &state,
        workspace_id,
        &user,
        &[WorkspaceRole::Owner, WorkspaceRole::Admin],
    )
    .await?;

    let decision = state
        .gate
        .check_limits(workspace_id, OperationKind::MemberAdd, None)
        .await?;
    if !decision.is_allowed() {
        return Err(ApiError::LimitExceeded {
            reason: DenyReason::MemberLimitReached,
        });
    }

    let token = Uuid::new_v4();
    let expires_at = OffsetDateTime::now_utc() + time::Duration::days(INVITE_TTL_DAYS);

    sqlx::query(
        r#"
        INSERT INTO workspace_invites (id, workspace_id, email, token, invited_by, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workspace_id.0)
    .bind(&email)
    .bind(token)
    .bind(user.user_id.0)
    .bind(expires_at)
    .execute(&state.pool)
    .await?;

    Ok(Json(InviteResponse {
        token,
        email,
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInviteRequest {
    pub token: Uuid,
}

/// Accept an invite. Seat cap is enforced under the workspace row lock so
/// two racing accepts cannot both take the last seat.
pub async fn accept_invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AcceptInviteRequest>,
) -> ApiResult<Json<MemberResponse>> {
    let mut tx = state.pool.begin().await?;

    let invite = sqlx::query(
        r#"
        SELECT id, workspace_id FROM workspace_invites
        WHERE token = $1 AND accepted_at IS NULL AND expires_at > NOW()
        "#,
    )
    .bind(req.token)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound)?;

    let invite_id: Uuid = invite.try_get("id")?;
    let workspace_id = WorkspaceId(invite.try_get("workspace_id")?);

    let ws = sqlx::query("SELECT plan_id FROM workspaces WHERE id = $1 FOR UPDATE")
        .bind(workspace_id.0)
        .fetch_one(&mut *tx)
        .await?;
    let tier: String = ws.try_get("plan_id")?;
    let tier = tier.parse().map_err(|_| ApiError::Internal)?;
    let plan = state.catalog.plan(tier).await?;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM workspace_members WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_one(&mut *tx)
            .await?;
    if !plan.limits.members.allows(count.max(0) as u64, 1) {
        return Err(ApiError::LimitExceeded {
            reason: DenyReason::MemberLimitReached,
        });
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO workspace_members (workspace_id, user_id, role)
        VALUES ($1, $2, 'member')
        ON CONFLICT (workspace_id, user_id) DO NOTHING
        "#,
    )
    .bind(workspace_id.0)
    .bind(user.user_id.0)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "already a member of this workspace".to_string(),
        ));
    }

    sqlx::query("UPDATE workspace_invites SET accepted_at = NOW() WHERE id = $1")
        .bind(invite_id)
        .execute(&mut *tx)
        .await?;

    audit::append(
        &mut *tx,
        workspace_id,
        Some(user.user_id),
        OperationKind::MemberAdd,
        0,
        None,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(workspace_id = %workspace_id, user_id = %user.user_id, "invite accepted");

    Ok(Json(MemberResponse {
        user_id: user.user_id.0,
        email: user.email.clone(),
        role: WorkspaceRole::Member,
        joined_at: OffsetDateTime::now_utc(),
    }))
}

/// Remove a member. Owners cannot be removed; transfer ownership first.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(member_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace_id = workspace_for(&state.pool, &user).await?;
    require_role(
        &state,
        workspace_id,
        &user,
        &[WorkspaceRole::Owner, WorkspaceRole::Admin],
    )
    .await?;

    let deleted = sqlx::query(
        r#"
        DELETE FROM workspace_members
        WHERE workspace_id = $1 AND user_id = $2 AND role <> 'owner'
        "#,
    )
    .bind(workspace_id.0)
    .bind(member_id)
    .execute(&state.pool)
    .await?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub user_id: Uuid,
}

/// Hand the workspace to another existing member.
pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<TransferOwnershipRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace_id = workspace_for(&state.pool, &user).await?;
    require_role(&state, workspace_id, &user, &[WorkspaceRole::Owner]).await?;

    if req.user_id == user.user_id.0 {
        return Err(ApiError::BadRequest(
            "cannot transfer ownership to yourself".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    let target = sqlx::query(
        "SELECT 1 AS present FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
    )
    .bind(workspace_id.0)
    .bind(req.user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if target.is_none() {
        return Err(ApiError::NotFound);
    }

    sqlx::query("UPDATE workspaces SET owner_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(workspace_id.0)
        .bind(req.user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE workspace_members SET role = 'admin' WHERE workspace_id = $1 AND user_id = $2",
    )
    .bind(workspace_id.0)
    .bind(user.user_id.0)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE workspace_members SET role = 'owner' WHERE workspace_id = $1 AND user_id = $2",
    )
    .bind(workspace_id.0)
    .bind(req.user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        workspace_id = %workspace_id,
        from = %user.user_id,
        to = %req.user_id,
        "workspace ownership transferred"
    );

    Ok(Json(serde_json::json!({ "success": true })))
}
