//! Usage audit log
//!
//! Append-only record of every successful charge. Rows are written inside
//! the gate's consume transaction, so a log entry exists iff the counters
//! moved.

use leadpilot_shared::{UserId, WorkspaceId};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::EntitlementResult;
use crate::gate::OperationKind;

#[derive(Debug, Clone, Serialize)]
pub struct UsageLog {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub cost: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UsageLog {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            user_id: row.try_get("user_id")?,
            action: row.try_get("action")?,
            cost: row.try_get("cost")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Append a charge record on the caller's connection. Meant to run inside
/// the consume transaction.
pub async fn append(
    conn: &mut PgConnection,
    workspace_id: WorkspaceId,
    user_id: Option<UserId>,
    kind: OperationKind,
    cost: u64,
    metadata: Option<serde_json::Value>,
) -> EntitlementResult<()> {
    sqlx::query(
        r#"
        INSERT INTO usage_logs (id, workspace_id, user_id, action, cost, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workspace_id.0)
    .bind(user_id.map(|u| u.0))
    .bind(kind.as_str())
    .bind(cost as i64)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(())
}

/// Read side of the audit log.
#[derive(Clone)]
pub struct UsageLogger {
    pool: PgPool,
}

impl UsageLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest-first page of charge records for a workspace.
    pub async fn recent(
        &self,
        workspace_id: WorkspaceId,
        limit: i64,
    ) -> EntitlementResult<Vec<UsageLog>> {
        let logs = sqlx::query_as::<_, UsageLog>(
            r#"
            SELECT id, workspace_id, user_id, action, cost, metadata, created_at
            FROM usage_logs
            WHERE workspace_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workspace_id.0)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
