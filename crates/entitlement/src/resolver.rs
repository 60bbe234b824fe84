//! Entitlement resolver
//!
//! Builds the read-only snapshot the dashboard and middleware consume: the
//! caller's workspace, its merged plan, current-period usage, and remaining
//! headroom per resource. Membership is derived from `workspace_members`;
//! users carry no plan state of their own.

use leadpilot_shared::{Limit, UserId, WorkspaceId};
use serde::Serialize;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use crate::catalog::{Plan, PlanCatalog};
use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::{LedgerStore, UsageLedger};

/// Remaining headroom per resource, already netted against current usage.
#[derive(Debug, Clone, Serialize)]
pub struct RemainingResources {
    pub credits: Limit,
    pub light_scrapes: Limit,
    pub deep_scrapes: Limit,
    pub sequences: Limit,
    pub templates: Limit,
    pub smtp_today: Limit,
    pub member_seats: Limit,
}

/// Point-in-time entitlement state for one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSnapshot {
    pub workspace_id: WorkspaceId,
    pub plan: Plan,
    pub usage: UsageLedger,
    pub remaining: RemainingResources,
    pub member_count: u64,
    pub can_deep_scrape: bool,
    pub next_reset: OffsetDateTime,
}

#[derive(Clone)]
pub struct EntitlementResolver {
    pool: PgPool,
    catalog: PlanCatalog,
    store: LedgerStore,
}

impl EntitlementResolver {
    pub fn new(pool: PgPool) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let store = LedgerStore::new(pool.clone());
        Self {
            pool,
            catalog,
            store,
        }
    }

    /// Resolve the snapshot for a user's workspace. Users belong to at most
    /// a handful of workspaces; the earliest membership wins as the default.
    pub async fn resolve(&self, user_id: UserId) -> EntitlementResult<EntitlementSnapshot> {
        let row = sqlx::query(
            r#"
            SELECT workspace_id FROM workspace_members
            WHERE user_id = $1
            ORDER BY joined_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EntitlementError::NoWorkspace)?;

        let workspace_id: uuid::Uuid = row.try_get("workspace_id")?;
        self.resolve_workspace(workspace_id.into()).await
    }

    /// Resolve the snapshot for a known workspace.
    pub async fn resolve_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> EntitlementResult<EntitlementSnapshot> {
        let now = OffsetDateTime::now_utc();

        let ws = sqlx::query(
            r#"
            SELECT
                w.plan_id,
                w.next_reset,
                (SELECT COUNT(*) FROM workspace_members m WHERE m.workspace_id = w.id) AS member_count
            FROM workspaces w
            WHERE w.id = $1
            "#,
        )
        .bind(workspace_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EntitlementError::WorkspaceNotFound(workspace_id.to_string()))?;

        let tier: String = ws.try_get("plan_id")?;
        let tier = tier
            .parse()
            .map_err(|_| EntitlementError::PlanNotFound(tier))?;
        let next_reset: OffsetDateTime = ws.try_get("next_reset")?;
        let member_count: i64 = ws.try_get("member_count")?;
        let member_count = member_count.max(0) as u64;

        let plan = self.catalog.plan(tier).await?;
        let usage = self
            .store
            .current_view(workspace_id, now, next_reset)
            .await?;

        let remaining = RemainingResources {
            credits: plan.limits.credits.remaining(usage.credits_used.max(0) as u64),
            light_scrapes: plan
                .limits
                .light_scrapes
                .remaining(usage.light_scrapes_used.max(0) as u64),
            deep_scrapes: plan
                .limits
                .deep_scrapes
                .remaining(usage.deep_scrapes_used.max(0) as u64),
            sequences: plan
                .limits
                .sequences
                .remaining(usage.sequences_used.max(0) as u64),
            templates: plan
                .limits
                .templates
                .remaining(usage.templates_used.max(0) as u64),
            smtp_today: plan
                .limits
                .smtp_per_day
                .remaining(usage.smtp_used_on(now.date())),
            member_seats: plan.limits.members.remaining(member_count),
        };

        let can_deep_scrape = plan.deep_scraper_enabled
            && plan
                .limits
                .deep_scrapes
                .allows(usage.deep_scrapes_used.max(0) as u64, 1);

        // The healed view may sit one cycle past the stored next_reset;
        // present the view's boundary either way.
        let next_reset = usage.reset_at;

        Ok(EntitlementSnapshot {
            workspace_id,
            plan,
            usage,
            remaining,
            member_count,
            can_deep_scrape,
            next_reset,
        })
    }
}
