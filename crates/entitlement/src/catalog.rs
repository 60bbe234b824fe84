//! Plan catalog
//!
//! The authoritative table of plan tiers and their per-cycle limits. Builtin
//! defaults live in code; the `plans` table can override limits and display
//! metadata per tier (the primary key guarantees at most one row per tier).
//! Read-mostly: the catalog never mutates workspace state.

use leadpilot_shared::{Limit, PlanTier};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use crate::error::EntitlementResult;

/// Per-cycle limits for one plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Credit allowance per billing cycle
    pub credits: Limit,
    /// Member seat cap
    pub members: Limit,
    /// Light scrapes per cycle
    pub light_scrapes: Limit,
    /// Deep scrapes per cycle (gated separately by `deep_scraper_enabled`)
    pub deep_scrapes: Limit,
    /// Outreach sequences per cycle
    pub sequences: Limit,
    /// Email templates per cycle
    pub templates: Limit,
    /// Selectable AI tone modes
    pub ai_tone_modes: Limit,
    /// SMTP sends per day (not per cycle)
    pub smtp_per_day: Limit,
}

/// Display metadata. Irrelevant to correctness; carried for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDisplay {
    pub name: String,
    pub badge: Option<String>,
    pub color: Option<String>,
}

/// A fully-merged catalog entry for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub limits: PlanLimits,
    /// Deep scraping is a feature flag independent of the numeric cap.
    pub deep_scraper_enabled: bool,
    /// IMAP mailbox sync interval in minutes; `None` = plan has no IMAP sync.
    pub imap_sync_interval_minutes: Option<u32>,
    /// Named integrations enabled on this plan
    pub integrations: Vec<String>,
    pub display: PlanDisplay,
}

impl Plan {
    /// Builtin catalog entry for a tier. The database may override these.
    pub fn builtin(tier: PlanTier) -> Plan {
        match tier {
            PlanTier::Free => Plan {
                tier,
                limits: PlanLimits {
                    credits: Limit::At(50),
                    members: Limit::At(1),
                    light_scrapes: Limit::At(20),
                    deep_scrapes: Limit::At(0),
                    sequences: Limit::At(1),
                    templates: Limit::At(3),
                    ai_tone_modes: Limit::At(2),
                    smtp_per_day: Limit::At(10),
                },
                deep_scraper_enabled: false,
                imap_sync_interval_minutes: None,
                integrations: vec![],
                display: PlanDisplay {
                    name: "Free".to_string(),
                    badge: None,
                    color: None,
                },
            },
            PlanTier::Starter => Plan {
                tier,
                limits: PlanLimits {
                    credits: Limit::At(500),
                    members: Limit::At(3),
                    light_scrapes: Limit::At(200),
                    deep_scrapes: Limit::At(0),
                    sequences: Limit::At(5),
                    templates: Limit::At(20),
                    ai_tone_modes: Limit::At(5),
                    smtp_per_day: Limit::At(100),
                },
                deep_scraper_enabled: false,
                imap_sync_interval_minutes: Some(60),
                integrations: vec!["csv_export".to_string()],
                display: PlanDisplay {
                    name: "Starter".to_string(),
                    badge: None,
                    color: Some("#4f76f6".to_string()),
                },
            },
            PlanTier::Pro => Plan {
                tier,
                limits: PlanLimits {
                    credits: Limit::At(2_000),
                    members: Limit::At(10),
                    light_scrapes: Limit::At(1_000),
                    deep_scrapes: Limit::At(300),
                    sequences: Limit::At(25),
                    templates: Limit::At(100),
                    ai_tone_modes: Limit::Unlimited,
                    smtp_per_day: Limit::At(500),
                },
                deep_scraper_enabled: true,
                imap_sync_interval_minutes: Some(15),
                integrations: vec!["csv_export".to_string(), "crm_sync".to_string()],
                display: PlanDisplay {
                    name: "Pro".to_string(),
                    badge: Some("Popular".to_string()),
                    color: Some("#7c3aed".to_string()),
                },
            },
            PlanTier::Agency => Plan {
                tier,
                limits: PlanLimits {
                    credits: Limit::Unlimited,
                    members: Limit::Unlimited,
                    light_scrapes: Limit::Unlimited,
                    deep_scrapes: Limit::Unlimited,
                    sequences: Limit::Unlimited,
                    templates: Limit::Unlimited,
                    ai_tone_modes: Limit::Unlimited,
                    smtp_per_day: Limit::At(2_000),
                },
                deep_scraper_enabled: true,
                imap_sync_interval_minutes: Some(5),
                integrations: vec![
                    "csv_export".to_string(),
                    "crm_sync".to_string(),
                    "api_access".to_string(),
                    "white_label".to_string(),
                ],
                display: PlanDisplay {
                    name: "Agency".to_string(),
                    badge: Some("Best value".to_string()),
                    color: Some("#d97706".to_string()),
                },
            },
        }
    }
}

/// Catalog service: builtin defaults merged with `plans` table overrides.
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the merged plan for a tier. Falls back to the builtin entry when
    /// no override row exists; the catalog is authoritative either way.
    pub async fn plan(&self, tier: PlanTier) -> EntitlementResult<Plan> {
        let row = sqlx::query(
            r#"
            SELECT
                display_name, badge, color,
                credits, max_members, light_scrapes, deep_scrapes,
                deep_scraper_enabled, sequences, templates, ai_tone_modes,
                smtp_per_day, imap_sync_interval_minutes, integrations
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(tier.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Plan::builtin(tier));
        };

        let imap_minutes: Option<i32> = row.try_get("imap_sync_interval_minutes")?;

        Ok(Plan {
            tier,
            limits: PlanLimits {
                credits: Limit::from_db(row.try_get("credits")?),
                members: Limit::from_db(row.try_get("max_members")?),
                light_scrapes: Limit::from_db(row.try_get("light_scrapes")?),
                deep_scrapes: Limit::from_db(row.try_get("deep_scrapes")?),
                sequences: Limit::from_db(row.try_get("sequences")?),
                templates: Limit::from_db(row.try_get("templates")?),
                ai_tone_modes: Limit::from_db(row.try_get("ai_tone_modes")?),
                smtp_per_day: Limit::from_db(row.try_get("smtp_per_day")?),
            },
            deep_scraper_enabled: row.try_get("deep_scraper_enabled")?,
            imap_sync_interval_minutes: imap_minutes.map(|m| m as u32),
            integrations: row.try_get("integrations")?,
            display: PlanDisplay {
                name: row.try_get("display_name")?,
                badge: row.try_get("badge")?,
                color: row.try_get("color")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_has_a_builtin_entry() {
        for tier in PlanTier::all() {
            let plan = Plan::builtin(tier);
            assert_eq!(plan.tier, tier);
        }
    }

    #[test]
    fn free_plan_matches_published_limits() {
        let plan = Plan::builtin(PlanTier::Free);
        assert_eq!(plan.limits.credits, Limit::At(50));
        assert_eq!(plan.limits.members, Limit::At(1));
        assert!(!plan.deep_scraper_enabled);
        assert!(plan.imap_sync_interval_minutes.is_none());
    }

    #[test]
    fn starter_has_deep_scraper_disabled_regardless_of_cap() {
        let plan = Plan::builtin(PlanTier::Starter);
        assert!(!plan.deep_scraper_enabled);
        assert_eq!(plan.limits.deep_scrapes, Limit::At(0));
    }

    #[test]
    fn agency_credits_are_unlimited_but_smtp_is_capped() {
        let plan = Plan::builtin(PlanTier::Agency);
        assert!(plan.limits.credits.is_unlimited());
        assert_eq!(plan.limits.smtp_per_day, Limit::At(2_000));
    }
}
