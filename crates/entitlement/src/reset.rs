//! Billing-cycle resetter
//!
//! Scheduled sweep over workspaces whose cycle boundary has passed. Each
//! workspace is handled in its own transaction through the same rollover
//! primitive the gate uses, so a sweep that races a charge (or a second
//! sweep) observes the rollover already done and moves on without touching
//! the counters again.

use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::EntitlementResult;
use crate::ledger::LedgerStore;

/// Length of one billing cycle.
pub const CYCLE_PERIOD: time::Duration = time::Duration::days(30);

/// Workspaces processed per sweep invocation. Overflow is picked up by the
/// next scheduled run.
const SWEEP_BATCH: i64 = 500;

/// Next cycle boundary strictly after `now`, advanced from `prev` in whole
/// cycle steps. Anchoring on `prev` rather than `now` keeps the boundary
/// stable no matter how late the caller runs.
pub fn advance_next_reset(prev: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    let mut next = prev;
    while next <= now {
        next += CYCLE_PERIOD;
    }
    next
}

/// Result of one sweep run. Failures are collected per workspace so one bad
/// row cannot stall the rest of the batch.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub scanned: u64,
    pub reset: u64,
    pub failed: Vec<(Uuid, String)>,
}

#[derive(Clone)]
pub struct CycleResetter {
    pool: PgPool,
}

impl CycleResetter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reset every due workspace, up to [`SWEEP_BATCH`] of them. Safe to run
    /// concurrently with charges and with itself.
    pub async fn sweep(&self, now: OffsetDateTime) -> EntitlementResult<SweepOutcome> {
        let due = sqlx::query(
            r#"
            SELECT id FROM workspaces
            WHERE next_reset <= $1
            ORDER BY next_reset ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(SWEEP_BATCH)
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = SweepOutcome::default();

        for row in due {
            let workspace_id: Uuid = row.try_get("id")?;
            outcome.scanned += 1;

            match self.reset_one(workspace_id.into(), now).await {
                Ok(true) => outcome.reset += 1,
                // Another writer got there first; nothing left to do.
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(
                        workspace_id = %workspace_id,
                        error = %err,
                        "cycle reset failed for workspace"
                    );
                    outcome.failed.push((workspace_id, err.to_string()));
                }
            }
        }

        tracing::info!(
            scanned = outcome.scanned,
            reset = outcome.reset,
            failed = outcome.failed.len(),
            "cycle reset sweep finished"
        );
        Ok(outcome)
    }

    async fn reset_one(
        &self,
        workspace_id: leadpilot_shared::WorkspaceId,
        now: OffsetDateTime,
    ) -> EntitlementResult<bool> {
        let mut tx = self.pool.begin().await?;
        let (_, did_reset) = LedgerStore::rollover_if_due(&mut *tx, workspace_id, now).await?;
        tx.commit().await?;
        Ok(did_reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn boundary_in_the_future_is_left_alone() {
        let prev = datetime!(2025-07-01 00:00 UTC);
        let now = datetime!(2025-06-20 12:00 UTC);
        assert_eq!(advance_next_reset(prev, now), prev);
    }

    #[test]
    fn sweep_one_second_late_keeps_the_cycle_anchor() {
        let prev = datetime!(2025-06-01 00:00 UTC);
        let now = datetime!(2025-06-01 00:00:01 UTC);
        assert_eq!(advance_next_reset(prev, now), prev + CYCLE_PERIOD);
    }

    #[test]
    fn a_boundary_exactly_at_now_still_advances() {
        let prev = datetime!(2025-06-01 00:00 UTC);
        assert_eq!(advance_next_reset(prev, prev), prev + CYCLE_PERIOD);
    }

    #[test]
    fn several_missed_cycles_advance_in_whole_steps() {
        let prev = datetime!(2025-01-01 00:00 UTC);
        let now = prev + CYCLE_PERIOD * 3 + time::Duration::days(5);
        let next = advance_next_reset(prev, now);
        assert_eq!(next, prev + CYCLE_PERIOD * 4);
        assert!(next > now);
    }
}
