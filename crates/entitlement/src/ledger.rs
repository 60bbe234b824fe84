//! Usage ledger
//!
//! One row per workspace per billing period, keyed by the period's start
//! date. The ledger is a pure accumulator: counters only ever grow within a
//! period, and `used <= limit` is enforced by the gate inside the same
//! transaction as the increment, never here.
//!
//! All three writers (gate, resetter, webhook processor) go through
//! [`LedgerStore::rollover_if_due`], which locks the workspace row before the
//! ledger row. Keeping that lock order uniform is what makes concurrent
//! consumes, sweeps, and plan changes serialize cleanly per workspace.

use leadpilot_shared::WorkspaceId;
use serde::Serialize;
use sqlx::{PgConnection, Row};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{EntitlementError, EntitlementResult};
use crate::reset::advance_next_reset;

/// A single billing period's counters for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageLedger {
    pub workspace_id: Uuid,
    pub period_start: Date,
    /// When this entry goes stale and a new period begins
    pub reset_at: OffsetDateTime,
    pub credits_used: i64,
    pub light_scrapes_used: i64,
    pub deep_scrapes_used: i64,
    pub sequences_used: i64,
    pub templates_used: i64,
    pub ai_generations_used: i64,
    pub imap_syncs_used: i64,
    /// SMTP counter rolls daily inside the period
    pub smtp_sent_today: i64,
    pub smtp_day: Date,
}

impl UsageLedger {
    fn fresh(workspace_id: Uuid, today: Date, reset_at: OffsetDateTime) -> Self {
        Self {
            workspace_id,
            period_start: today,
            reset_at,
            credits_used: 0,
            light_scrapes_used: 0,
            deep_scrapes_used: 0,
            sequences_used: 0,
            templates_used: 0,
            ai_generations_used: 0,
            imap_syncs_used: 0,
            smtp_sent_today: 0,
            smtp_day: today,
        }
    }

    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        self.reset_at <= now
    }

    /// SMTP sends counted against `day`. The stored counter belongs to
    /// `smtp_day`; any other day reads as zero without a write.
    pub fn smtp_used_on(&self, day: Date) -> u64 {
        if self.smtp_day == day {
            self.smtp_sent_today.max(0) as u64
        } else {
            0
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UsageLedger {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workspace_id: row.try_get("workspace_id")?,
            period_start: row.try_get("period_start")?,
            reset_at: row.try_get("reset_at")?,
            credits_used: row.try_get("credits_used")?,
            light_scrapes_used: row.try_get("light_scrapes_used")?,
            deep_scrapes_used: row.try_get("deep_scrapes_used")?,
            sequences_used: row.try_get("sequences_used")?,
            templates_used: row.try_get("templates_used")?,
            ai_generations_used: row.try_get("ai_generations_used")?,
            imap_syncs_used: row.try_get("imap_syncs_used")?,
            smtp_sent_today: row.try_get("smtp_sent_today")?,
            smtp_day: row.try_get("smtp_day")?,
        })
    }
}

const SELECT_CURRENT: &str = r#"
    SELECT workspace_id, period_start, reset_at,
           credits_used, light_scrapes_used, deep_scrapes_used,
           sequences_used, templates_used, ai_generations_used,
           imap_syncs_used, smtp_sent_today, smtp_day
    FROM usage_ledgers
    WHERE workspace_id = $1
    ORDER BY period_start DESC
    LIMIT 1
"#;

/// Storage access for ledger rows. Holds no state beyond the pool; the
/// transactional entry points take an explicit connection so the caller
/// controls the atomic unit.
#[derive(Clone)]
pub struct LedgerStore {
    pool: sqlx::PgPool,
}

impl LedgerStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Read-only fetch of the newest ledger entry (possibly stale).
    pub async fn fetch_current(
        &self,
        workspace_id: WorkspaceId,
    ) -> EntitlementResult<Option<UsageLedger>> {
        let ledger = sqlx::query_as::<_, UsageLedger>(SELECT_CURRENT)
            .bind(workspace_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ledger)
    }

    /// Presentation view of the current period. A stale or missing entry is
    /// shown as a zeroed period with the healed boundary, without writing;
    /// the next charge or sweep persists the rollover.
    pub async fn current_view(
        &self,
        workspace_id: WorkspaceId,
        now: OffsetDateTime,
        next_reset: OffsetDateTime,
    ) -> EntitlementResult<UsageLedger> {
        match self.fetch_current(workspace_id).await? {
            Some(ledger) if !ledger.is_stale(now) => Ok(ledger),
            _ => {
                let reset_at = if next_reset > now {
                    next_reset
                } else {
                    advance_next_reset(next_reset, now)
                };
                Ok(UsageLedger::fresh(workspace_id.0, now.date(), reset_at))
            }
        }
    }

    /// Lock and return the current ledger entry for a workspace, starting a
    /// fresh period first when the old one has elapsed (or none exists yet).
    ///
    /// Must run inside a transaction. Locks the `workspaces` row FOR UPDATE
    /// before touching ledger rows; on rollover, `next_reset` advances by
    /// whole cycle periods from its previous value so a late caller cannot
    /// drift the cycle boundary. Returns the (locked) entry plus whether a
    /// rollover happened, which the sweep uses for idempotent accounting.
    pub async fn rollover_if_due(
        conn: &mut PgConnection,
        workspace_id: WorkspaceId,
        now: OffsetDateTime,
    ) -> EntitlementResult<(UsageLedger, bool)> {
        let ws = sqlx::query("SELECT next_reset FROM workspaces WHERE id = $1 FOR UPDATE")
            .bind(workspace_id.0)
            .fetch_optional(&mut *conn)
            .await?;

        let ws = ws.ok_or_else(|| {
            EntitlementError::WorkspaceNotFound(workspace_id.0.to_string())
        })?;
        let next_reset: OffsetDateTime = ws.try_get("next_reset")?;

        let current = sqlx::query_as::<_, UsageLedger>(&format!("{SELECT_CURRENT} FOR UPDATE"))
            .bind(workspace_id.0)
            .fetch_optional(&mut *conn)
            .await?;

        match current {
            Some(ledger) if !ledger.is_stale(now) => Ok((ledger, false)),
            Some(stale) => {
                // Period elapsed: advance the boundary from the previous
                // next_reset (never from `now`) and zero a fresh entry.
                let advanced = advance_next_reset(next_reset.min(stale.reset_at), now);
                sqlx::query("UPDATE workspaces SET next_reset = $1, updated_at = NOW() WHERE id = $2")
                    .bind(advanced)
                    .bind(workspace_id.0)
                    .execute(&mut *conn)
                    .await?;
                let fresh = Self::start_period(conn, workspace_id, now.date(), advanced).await?;
                Ok((fresh, true))
            }
            None => {
                // Lazily initialize the first period for a new workspace.
                let reset_at = if next_reset > now {
                    next_reset
                } else {
                    advance_next_reset(next_reset, now)
                };
                if reset_at != next_reset {
                    sqlx::query(
                        "UPDATE workspaces SET next_reset = $1, updated_at = NOW() WHERE id = $2",
                    )
                    .bind(reset_at)
                    .bind(workspace_id.0)
                    .execute(&mut *conn)
                    .await?;
                }
                let fresh = Self::start_period(conn, workspace_id, now.date(), reset_at).await?;
                Ok((fresh, false))
            }
        }
    }

    /// Insert a zeroed period entry. Upserts so a webhook reset landing on
    /// the same day as a sweep reset re-zeroes instead of failing.
    pub async fn start_period(
        conn: &mut PgConnection,
        workspace_id: WorkspaceId,
        period_start: Date,
        reset_at: OffsetDateTime,
    ) -> EntitlementResult<UsageLedger> {
        sqlx::query(
            r#"
            INSERT INTO usage_ledgers (
                workspace_id, period_start, reset_at,
                credits_used, light_scrapes_used, deep_scrapes_used,
                sequences_used, templates_used, ai_generations_used,
                imap_syncs_used, smtp_sent_today, smtp_day
            ) VALUES ($1, $2, $3, 0, 0, 0, 0, 0, 0, 0, 0, $2)
            ON CONFLICT (workspace_id, period_start) DO UPDATE SET
                reset_at = EXCLUDED.reset_at,
                credits_used = 0,
                light_scrapes_used = 0,
                deep_scrapes_used = 0,
                sequences_used = 0,
                templates_used = 0,
                ai_generations_used = 0,
                imap_syncs_used = 0,
                smtp_sent_today = 0,
                smtp_day = $2
            "#,
        )
        .bind(workspace_id.0)
        .bind(period_start)
        .bind(reset_at)
        .execute(&mut *conn)
        .await?;

        Ok(UsageLedger::fresh(workspace_id.0, period_start, reset_at))
    }

    /// Persist mutated counters for a locked entry. Only valid while the
    /// caller's transaction holds the row lock from `rollover_if_due`.
    pub async fn save_counters(
        conn: &mut PgConnection,
        ledger: &UsageLedger,
    ) -> EntitlementResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE usage_ledgers SET
                credits_used = $3,
                light_scrapes_used = $4,
                deep_scrapes_used = $5,
                sequences_used = $6,
                templates_used = $7,
                ai_generations_used = $8,
                imap_syncs_used = $9,
                smtp_sent_today = $10,
                smtp_day = $11
            WHERE workspace_id = $1 AND period_start = $2
            "#,
        )
        .bind(ledger.workspace_id)
        .bind(ledger.period_start)
        .bind(ledger.credits_used)
        .bind(ledger.light_scrapes_used)
        .bind(ledger.deep_scrapes_used)
        .bind(ledger.sequences_used)
        .bind(ledger.templates_used)
        .bind(ledger.ai_generations_used)
        .bind(ledger.imap_syncs_used)
        .bind(ledger.smtp_sent_today)
        .bind(ledger.smtp_day)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(EntitlementError::Internal(format!(
                "ledger row vanished for workspace {} period {}",
                ledger.workspace_id, ledger.period_start
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn ledger_at(reset_at: OffsetDateTime) -> UsageLedger {
        UsageLedger::fresh(Uuid::new_v4(), date!(2025 - 01 - 01), reset_at)
    }

    #[test]
    fn staleness_is_inclusive_of_the_boundary() {
        let ledger = ledger_at(datetime!(2025-02-01 00:00 UTC));
        assert!(!ledger.is_stale(datetime!(2025-01-31 23:59 UTC)));
        assert!(ledger.is_stale(datetime!(2025-02-01 00:00 UTC)));
        assert!(ledger.is_stale(datetime!(2025-02-01 00:00:01 UTC)));
    }

    #[test]
    fn smtp_counter_reads_zero_on_a_new_day() {
        let mut ledger = ledger_at(datetime!(2025-02-01 00:00 UTC));
        ledger.smtp_day = date!(2025 - 01 - 10);
        ledger.smtp_sent_today = 9;

        assert_eq!(ledger.smtp_used_on(date!(2025 - 01 - 10)), 9);
        assert_eq!(ledger.smtp_used_on(date!(2025 - 01 - 11)), 0);
    }
}
