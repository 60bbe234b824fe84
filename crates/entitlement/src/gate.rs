//! Operation gate
//!
//! The single choke point for metered operations. `check_limits` answers
//! "would this be allowed right now" without writing anything; `consume`
//! re-evaluates the same rules inside a transaction that holds the workspace
//! row lock and increments the counters only when every rule passes. Both
//! paths share [`evaluate`], so an advisory Allow and an actual charge can
//! never disagree about the rules, only about freshness.

use std::str::FromStr;

use leadpilot_shared::{Limit, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use time::{Date, OffsetDateTime};

use crate::audit;
use crate::catalog::{Plan, PlanCatalog};
use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::{LedgerStore, UsageLedger};

/// Maximum attempts for a consume transaction that keeps aborting on
/// serialization failures before the error surfaces to the caller.
const MAX_CONSUME_ATTEMPTS: u32 = 3;

/// Upper bound on a single charge. Ledger counters are i64; a cost past this
/// is a malformed request, not a spend, and is rejected before any rule runs.
/// Unlimited plans would otherwise approve an overflowing cost because the
/// allowance check saturates.
pub const MAX_COST: u64 = 1_000_000;

/// Every metered operation the gate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AiGeneration,
    LightScrape,
    DeepScrape,
    SequenceCreate,
    TemplateCreate,
    SmtpSend,
    ImapSync,
    MemberAdd,
}

impl OperationKind {
    /// Credit price when the caller does not supply an explicit cost.
    /// Structural operations (sequences, templates, members) are capped by
    /// their own counters and cost no credits.
    pub fn default_cost(&self) -> u64 {
        match self {
            Self::AiGeneration => 1,
            Self::LightScrape => 1,
            Self::DeepScrape => 5,
            Self::SequenceCreate
            | Self::TemplateCreate
            | Self::SmtpSend
            | Self::ImapSync
            | Self::MemberAdd => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiGeneration => "ai_generation",
            Self::LightScrape => "light_scrape",
            Self::DeepScrape => "deep_scrape",
            Self::SequenceCreate => "sequence_create",
            Self::TemplateCreate => "template_create",
            Self::SmtpSend => "smtp_send",
            Self::ImapSync => "imap_sync",
            Self::MemberAdd => "member_add",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_generation" => Ok(Self::AiGeneration),
            "light_scrape" => Ok(Self::LightScrape),
            "deep_scrape" => Ok(Self::DeepScrape),
            "sequence_create" => Ok(Self::SequenceCreate),
            "template_create" => Ok(Self::TemplateCreate),
            "smtp_send" => Ok(Self::SmtpSend),
            "imap_sync" => Ok(Self::ImapSync),
            "member_add" => Ok(Self::MemberAdd),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Closed set of denial codes. Clients branch on `code()`, never on the
/// human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InsufficientCredits,
    ScraperLimitReached,
    DeepScraperNotAllowed,
    SequenceLimit,
    TemplateLimit,
    SmtpDailyLimit,
    MemberLimitReached,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::ScraperLimitReached => "SCRAPER_LIMIT_REACHED",
            Self::DeepScraperNotAllowed => "DEEP_SCRAPER_NOT_ALLOWED",
            Self::SequenceLimit => "SEQUENCE_LIMIT",
            Self::TemplateLimit => "TEMPLATE_LIMIT",
            Self::SmtpDailyLimit => "SMTP_DAILY_LIMIT",
            Self::MemberLimitReached => "MEMBER_LIMIT_REACHED",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InsufficientCredits => "not enough credits remaining in this billing cycle",
            Self::ScraperLimitReached => "scrape limit reached for this billing cycle",
            Self::DeepScraperNotAllowed => "deep scraping is not available on this plan",
            Self::SequenceLimit => "sequence limit reached for this billing cycle",
            Self::TemplateLimit => "template limit reached for this billing cycle",
            Self::SmtpDailyLimit => "daily email send limit reached",
            Self::MemberLimitReached => "member seat limit reached for this plan",
        };
        f.write_str(msg)
    }
}

impl Serialize for DenyReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

/// Advisory answer from `check_limits`. A denial here is a value, not an
/// error; only an actual charge refusal surfaces as `EntitlementError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Receipt for a successful charge.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeOutcome {
    pub workspace_id: WorkspaceId,
    pub kind: OperationKind,
    pub cost: u64,
    pub credits_used: u64,
    pub credits_remaining: Limit,
}

/// Rule evaluation shared by the advisory and charging paths. Pure: no IO,
/// no clock reads. Denial checks run from most specific to most general so
/// the caller gets the narrowest reason.
fn evaluate(
    plan: &Plan,
    ledger: &UsageLedger,
    member_count: u64,
    today: Date,
    kind: OperationKind,
    cost: u64,
) -> Result<(), DenyReason> {
    // Seat changes are capped by headcount, not by cycle counters.
    if kind == OperationKind::MemberAdd {
        if !plan.limits.members.allows(member_count, 1) {
            return Err(DenyReason::MemberLimitReached);
        }
        return Ok(());
    }

    // The feature gate outranks the numeric cap: a plan with the feature off
    // reports "not allowed", never "limit reached".
    if kind == OperationKind::DeepScrape && !plan.deep_scraper_enabled {
        return Err(DenyReason::DeepScraperNotAllowed);
    }

    match kind {
        OperationKind::LightScrape => {
            if !plan
                .limits
                .light_scrapes
                .allows(ledger.light_scrapes_used.max(0) as u64, 1)
            {
                return Err(DenyReason::ScraperLimitReached);
            }
        }
        OperationKind::DeepScrape => {
            if !plan
                .limits
                .deep_scrapes
                .allows(ledger.deep_scrapes_used.max(0) as u64, 1)
            {
                return Err(DenyReason::ScraperLimitReached);
            }
        }
        OperationKind::SequenceCreate => {
            if !plan
                .limits
                .sequences
                .allows(ledger.sequences_used.max(0) as u64, 1)
            {
                return Err(DenyReason::SequenceLimit);
            }
        }
        OperationKind::TemplateCreate => {
            if !plan
                .limits
                .templates
                .allows(ledger.templates_used.max(0) as u64, 1)
            {
                return Err(DenyReason::TemplateLimit);
            }
        }
        OperationKind::SmtpSend => {
            if !plan
                .limits
                .smtp_per_day
                .allows(ledger.smtp_used_on(today), 1)
            {
                return Err(DenyReason::SmtpDailyLimit);
            }
        }
        OperationKind::AiGeneration | OperationKind::ImapSync | OperationKind::MemberAdd => {}
    }

    if cost > 0
        && !plan
            .limits
            .credits
            .allows(ledger.credits_used.max(0) as u64, cost)
    {
        return Err(DenyReason::InsufficientCredits);
    }

    Ok(())
}

/// Mutate a ledger entry for a charge that already passed evaluation.
fn apply(ledger: &mut UsageLedger, kind: OperationKind, cost: u64, today: Date) {
    ledger.credits_used += cost as i64;
    match kind {
        OperationKind::AiGeneration => ledger.ai_generations_used += 1,
        OperationKind::LightScrape => ledger.light_scrapes_used += 1,
        OperationKind::DeepScrape => ledger.deep_scrapes_used += 1,
        OperationKind::SequenceCreate => ledger.sequences_used += 1,
        OperationKind::TemplateCreate => ledger.templates_used += 1,
        OperationKind::ImapSync => ledger.imap_syncs_used += 1,
        OperationKind::SmtpSend => {
            if ledger.smtp_day != today {
                ledger.smtp_day = today;
                ledger.smtp_sent_today = 0;
            }
            ledger.smtp_sent_today += 1;
        }
        OperationKind::MemberAdd => {}
    }
}

/// The two-phase gate over plan rules and the usage ledger.
#[derive(Clone)]
pub struct OperationGate {
    pool: PgPool,
    catalog: PlanCatalog,
    store: LedgerStore,
}

impl OperationGate {
    pub fn new(pool: PgPool) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let store = LedgerStore::new(pool.clone());
        Self {
            pool,
            catalog,
            store,
        }
    }

    /// Advisory check: would this operation be allowed right now? Takes no
    /// locks and writes nothing, so the answer can go stale immediately;
    /// `consume` is the only authority on whether a charge lands.
    pub async fn check_limits(
        &self,
        workspace_id: WorkspaceId,
        kind: OperationKind,
        cost: Option<u64>,
    ) -> EntitlementResult<GateDecision> {
        let cost = cost.unwrap_or_else(|| kind.default_cost());
        if cost > MAX_COST {
            return Err(EntitlementError::CostOutOfRange(cost));
        }
        let now = OffsetDateTime::now_utc();

        let plan = self.workspace_plan(workspace_id).await?;
        let ledger = self.current_view(workspace_id, now).await?;
        let member_count = if kind == OperationKind::MemberAdd {
            self.member_count(workspace_id).await?
        } else {
            0
        };

        match evaluate(&plan, &ledger, member_count, now.date(), kind, cost) {
            Ok(()) => Ok(GateDecision::Allow),
            Err(reason) => Ok(GateDecision::Deny(reason)),
        }
    }

    /// Atomically check and charge. On success the counters are incremented
    /// and a usage log row is appended in the same transaction; on denial
    /// nothing is written and the error carries the denial code.
    ///
    /// Serialization aborts retry up to [`MAX_CONSUME_ATTEMPTS`] times before
    /// surfacing as `Contention`.
    pub async fn consume(
        &self,
        workspace_id: WorkspaceId,
        user_id: Option<UserId>,
        kind: OperationKind,
        cost: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) -> EntitlementResult<ChargeOutcome> {
        let cost = cost.unwrap_or_else(|| kind.default_cost());
        if cost > MAX_COST {
            return Err(EntitlementError::CostOutOfRange(cost));
        }

        let mut attempt = 1;
        loop {
            match self
                .try_consume(workspace_id, user_id, kind, cost, metadata.clone())
                .await
            {
                Err(EntitlementError::Contention(detail)) if attempt < MAX_CONSUME_ATTEMPTS => {
                    tracing::warn!(
                        workspace_id = %workspace_id,
                        kind = %kind,
                        attempt,
                        detail = %detail,
                        "consume transaction aborted, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_consume(
        &self,
        workspace_id: WorkspaceId,
        user_id: Option<UserId>,
        kind: OperationKind,
        cost: u64,
        metadata: Option<serde_json::Value>,
    ) -> EntitlementResult<ChargeOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        // Workspace row locked here; everything below is serialized per
        // workspace until commit.
        let (mut ledger, _) = LedgerStore::rollover_if_due(&mut *tx, workspace_id, now).await?;

        let tier = sqlx::query("SELECT plan_id FROM workspaces WHERE id = $1")
            .bind(workspace_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let tier: String = tier.try_get("plan_id")?;
        let tier = tier
            .parse()
            .map_err(|_| EntitlementError::PlanNotFound(tier))?;
        let plan = self.catalog.plan(tier).await?;

        let member_count = if kind == OperationKind::MemberAdd {
            let row =
                sqlx::query("SELECT COUNT(*) AS n FROM workspace_members WHERE workspace_id = $1")
                    .bind(workspace_id.0)
                    .fetch_one(&mut *tx)
                    .await?;
            let n: i64 = row.try_get("n")?;
            n.max(0) as u64
        } else {
            0
        };

        if let Err(reason) = evaluate(&plan, &ledger, member_count, now.date(), kind, cost) {
            tx.rollback().await?;
            return Err(EntitlementError::Denied(reason));
        }

        apply(&mut ledger, kind, cost, now.date());
        LedgerStore::save_counters(&mut *tx, &ledger).await?;
        audit::append(&mut *tx, workspace_id, user_id, kind, cost, metadata).await?;

        tx.commit().await?;

        let credits_used = ledger.credits_used.max(0) as u64;
        tracing::info!(
            workspace_id = %workspace_id,
            kind = %kind,
            cost,
            credits_used,
            "operation charged"
        );

        Ok(ChargeOutcome {
            workspace_id,
            kind,
            cost,
            credits_used,
            credits_remaining: plan.limits.credits.remaining(credits_used),
        })
    }

    async fn workspace_plan(&self, workspace_id: WorkspaceId) -> EntitlementResult<Plan> {
        let row = sqlx::query("SELECT plan_id FROM workspaces WHERE id = $1")
            .bind(workspace_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EntitlementError::WorkspaceNotFound(workspace_id.to_string()))?;
        let tier: String = row.try_get("plan_id")?;
        let tier = tier
            .parse()
            .map_err(|_| EntitlementError::PlanNotFound(tier))?;
        self.catalog.plan(tier).await
    }

    async fn current_view(
        &self,
        workspace_id: WorkspaceId,
        now: OffsetDateTime,
    ) -> EntitlementResult<UsageLedger> {
        let row = sqlx::query("SELECT next_reset FROM workspaces WHERE id = $1")
            .bind(workspace_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EntitlementError::WorkspaceNotFound(workspace_id.to_string()))?;
        let next_reset: OffsetDateTime = row.try_get("next_reset")?;
        self.store.current_view(workspace_id, now, next_reset).await
    }

    async fn member_count(&self, workspace_id: WorkspaceId) -> EntitlementResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM workspace_members WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpilot_shared::PlanTier;
    use time::macros::{date, datetime};
    use uuid::Uuid;

    const TODAY: Date = date!(2025 - 06 - 10);

    fn ledger() -> UsageLedger {
        UsageLedger {
            workspace_id: Uuid::new_v4(),
            period_start: date!(2025 - 06 - 01),
            reset_at: datetime!(2025-07-01 00:00 UTC),
            credits_used: 0,
            light_scrapes_used: 0,
            deep_scrapes_used: 0,
            sequences_used: 0,
            templates_used: 0,
            ai_generations_used: 0,
            imap_syncs_used: 0,
            smtp_sent_today: 0,
            smtp_day: TODAY,
        }
    }

    fn check(
        tier: PlanTier,
        ledger: &UsageLedger,
        kind: OperationKind,
        cost: u64,
    ) -> Result<(), DenyReason> {
        evaluate(&Plan::builtin(tier), ledger, 0, TODAY, kind, cost)
    }

    #[test]
    fn charge_lands_when_cost_fits_remaining_credits() {
        let mut l = ledger();
        l.credits_used = 48; // free cap is 50
        assert_eq!(check(PlanTier::Free, &l, OperationKind::AiGeneration, 1), Ok(()));
    }

    #[test]
    fn charge_exceeding_remaining_credits_is_denied() {
        let mut l = ledger();
        l.credits_used = 49;
        assert_eq!(
            check(PlanTier::Free, &l, OperationKind::DeepScrape, 5),
            Err(DenyReason::DeepScraperNotAllowed)
        );
        // Same headroom on a plan where the feature exists: credits deny.
        assert_eq!(
            check(PlanTier::Pro, &l, OperationKind::AiGeneration, 5),
            Err(DenyReason::InsufficientCredits)
        );
    }

    #[test]
    fn zero_cost_operations_ignore_the_credit_balance() {
        let mut l = ledger();
        l.credits_used = 500; // starter cap exactly spent
        assert_eq!(check(PlanTier::Starter, &l, OperationKind::ImapSync, 0), Ok(()));
        assert_eq!(check(PlanTier::Starter, &l, OperationKind::SmtpSend, 0), Ok(()));
    }

    #[test]
    fn deep_scrape_feature_gate_outranks_the_numeric_cap() {
        let l = ledger();
        // Starter's deep_scrapes cap is 0 AND the feature is off; the
        // feature-gate reason must win.
        assert_eq!(
            check(PlanTier::Starter, &l, OperationKind::DeepScrape, 5),
            Err(DenyReason::DeepScraperNotAllowed)
        );
    }

    #[test]
    fn deep_scrape_cap_denies_as_scraper_limit_when_feature_is_on() {
        let mut l = ledger();
        l.deep_scrapes_used = 300; // pro cap
        assert_eq!(
            check(PlanTier::Pro, &l, OperationKind::DeepScrape, 5),
            Err(DenyReason::ScraperLimitReached)
        );
    }

    #[test]
    fn light_scrape_cap_denies_at_the_boundary() {
        let mut l = ledger();
        l.light_scrapes_used = 19;
        assert_eq!(check(PlanTier::Free, &l, OperationKind::LightScrape, 1), Ok(()));
        l.light_scrapes_used = 20;
        assert_eq!(
            check(PlanTier::Free, &l, OperationKind::LightScrape, 1),
            Err(DenyReason::ScraperLimitReached)
        );
    }

    #[test]
    fn sequence_and_template_caps_have_their_own_reasons() {
        let mut l = ledger();
        l.sequences_used = 1;
        assert_eq!(
            check(PlanTier::Free, &l, OperationKind::SequenceCreate, 0),
            Err(DenyReason::SequenceLimit)
        );
        let mut l = ledger();
        l.templates_used = 3;
        assert_eq!(
            check(PlanTier::Free, &l, OperationKind::TemplateCreate, 0),
            Err(DenyReason::TemplateLimit)
        );
    }

    #[test]
    fn smtp_daily_cap_resets_with_the_calendar_day() {
        let mut l = ledger();
        l.smtp_sent_today = 10; // free cap
        assert_eq!(
            check(PlanTier::Free, &l, OperationKind::SmtpSend, 0),
            Err(DenyReason::SmtpDailyLimit)
        );
        // Counter belongs to yesterday: today reads zero and the send passes.
        l.smtp_day = date!(2025 - 06 - 09);
        assert_eq!(check(PlanTier::Free, &l, OperationKind::SmtpSend, 0), Ok(()));
    }

    #[test]
    fn member_cap_uses_headcount_not_counters() {
        let plan = Plan::builtin(PlanTier::Starter); // 3 seats
        let l = ledger();
        assert_eq!(
            evaluate(&plan, &l, 2, TODAY, OperationKind::MemberAdd, 0),
            Ok(())
        );
        assert_eq!(
            evaluate(&plan, &l, 3, TODAY, OperationKind::MemberAdd, 0),
            Err(DenyReason::MemberLimitReached)
        );
    }

    #[test]
    fn unlimited_plan_never_denies_on_credits_or_scrapes() {
        let mut l = ledger();
        l.credits_used = 10_000_000;
        l.deep_scrapes_used = 10_000_000;
        assert_eq!(check(PlanTier::Agency, &l, OperationKind::DeepScrape, 5), Ok(()));
        // But the daily SMTP cap still binds.
        l.smtp_sent_today = 2_000;
        assert_eq!(
            check(PlanTier::Agency, &l, OperationKind::SmtpSend, 0),
            Err(DenyReason::SmtpDailyLimit)
        );
    }

    #[test]
    fn apply_increments_the_matching_counter_and_credits() {
        let mut l = ledger();
        apply(&mut l, OperationKind::DeepScrape, 5, TODAY);
        assert_eq!(l.credits_used, 5);
        assert_eq!(l.deep_scrapes_used, 1);
        assert_eq!(l.light_scrapes_used, 0);

        apply(&mut l, OperationKind::SmtpSend, 0, TODAY);
        assert_eq!(l.smtp_sent_today, 1);
    }

    #[test]
    fn apply_rolls_the_smtp_day_forward() {
        let mut l = ledger();
        l.smtp_day = date!(2025 - 06 - 09);
        l.smtp_sent_today = 7;
        apply(&mut l, OperationKind::SmtpSend, 0, TODAY);
        assert_eq!(l.smtp_day, TODAY);
        assert_eq!(l.smtp_sent_today, 1);
    }

    #[test]
    fn operation_kind_round_trips_through_str() {
        for kind in [
            OperationKind::AiGeneration,
            OperationKind::LightScrape,
            OperationKind::DeepScrape,
            OperationKind::SequenceCreate,
            OperationKind::TemplateCreate,
            OperationKind::SmtpSend,
            OperationKind::ImapSync,
            OperationKind::MemberAdd,
        ] {
            let parsed: OperationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("mega_scrape".parse::<OperationKind>().is_err());
    }

    #[test]
    fn deny_reason_serializes_as_its_code() {
        let json = serde_json::to_string(&DenyReason::InsufficientCredits).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_CREDITS\"");
    }

    #[test]
    fn max_cost_fits_in_the_ledger_counters() {
        assert!(i64::try_from(MAX_COST).is_ok());
        let mut l = ledger();
        apply(&mut l, OperationKind::AiGeneration, MAX_COST, TODAY);
        assert_eq!(l.credits_used, MAX_COST as i64);
        assert!(l.credits_used > 0);
    }

    // An overflowing cost must never reach evaluate/apply: an unlimited
    // allowance would approve it and the i64 counter would wrap negative.
    // The lazy pool never connects, proving the rejection happens before
    // any database work.
    #[tokio::test]
    async fn oversized_cost_is_rejected_before_any_rule_runs() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let gate = OperationGate::new(pool);
        let huge = i64::MAX as u64 + 10;

        let err = gate
            .consume(
                WorkspaceId::new(),
                None,
                OperationKind::AiGeneration,
                Some(huge),
                None,
            )
            .await
            .expect_err("overflowing cost must be rejected");
        assert!(matches!(err, EntitlementError::CostOutOfRange(_)));

        let err = gate
            .check_limits(WorkspaceId::new(), OperationKind::AiGeneration, Some(huge))
            .await
            .expect_err("advisory path rejects the same way");
        assert!(matches!(err, EntitlementError::CostOutOfRange(_)));
    }
}
