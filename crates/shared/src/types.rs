//! Common types used across LeadPilot

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Workspace ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub Uuid);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkspaceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Agency,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Starter => write!(f, "starter"),
            Self::Pro => write!(f, "pro"),
            Self::Agency => write!(f, "agency"),
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "agency" => Ok(Self::Agency),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

impl PlanTier {
    pub fn all() -> [PlanTier; 4] {
        [Self::Free, Self::Starter, Self::Pro, Self::Agency]
    }
}

/// Role of a user inside a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
}

impl std::fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for WorkspaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown workspace role: {other}")),
        }
    }
}

// =============================================================================
// Limits
// =============================================================================

/// A per-cycle resource limit. `Unlimited` is the sentinel used by higher
/// tiers; it always leaves `Unlimited` remaining no matter how much was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    At(u64),
}

impl Limit {
    /// Whether `cost` more units fit under this limit given `used` so far.
    pub fn allows(&self, used: u64, cost: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::At(cap) => used.saturating_add(cost) <= *cap,
        }
    }

    /// Remaining headroom: `max(0, cap - used)`, or `Unlimited`.
    pub fn remaining(&self, used: u64) -> Limit {
        match self {
            Limit::Unlimited => Limit::Unlimited,
            Limit::At(cap) => Limit::At(cap.saturating_sub(used)),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Database representation: any negative value means unlimited.
    pub fn from_db(raw: i64) -> Limit {
        if raw < 0 {
            Limit::Unlimited
        } else {
            Limit::At(raw as u64)
        }
    }

    /// Inverse of [`Limit::from_db`]; unlimited is stored as -1.
    pub fn to_db(&self) -> i64 {
        match self {
            Limit::Unlimited => -1,
            Limit::At(cap) => *cap as i64,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Limit::Unlimited => serializer.serialize_str("unlimited"),
            Limit::At(cap) => serializer.serialize_u64(*cap),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(cap) => Ok(Limit::At(cap)),
            Raw::Text(s) if s == "unlimited" => Ok(Limit::Unlimited),
            Raw::Text(other) => Err(serde::de::Error::custom(format!("invalid limit: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tier_round_trips_through_str() {
        for tier in PlanTier::all() {
            let parsed: PlanTier = tier.to_string().parse().unwrap();
            assert_eq!(parsed, tier);
        }
        assert!("enterprise".parse::<PlanTier>().is_err());
    }

    #[test]
    fn limit_allows_respects_cap() {
        assert!(Limit::At(50).allows(48, 1));
        assert!(Limit::At(50).allows(49, 1));
        assert!(!Limit::At(50).allows(49, 5));
        assert!(Limit::Unlimited.allows(u64::MAX, u64::MAX));
    }

    #[test]
    fn limit_remaining_saturates_at_zero() {
        assert_eq!(Limit::At(50).remaining(48), Limit::At(2));
        assert_eq!(Limit::At(50).remaining(60), Limit::At(0));
        assert_eq!(Limit::Unlimited.remaining(10_000), Limit::Unlimited);
    }

    #[test]
    fn limit_db_round_trip() {
        assert_eq!(Limit::from_db(-1), Limit::Unlimited);
        assert_eq!(Limit::from_db(0), Limit::At(0));
        assert_eq!(Limit::from_db(500), Limit::At(500));
        assert_eq!(Limit::Unlimited.to_db(), -1);
        assert_eq!(Limit::At(42).to_db(), 42);
    }

    #[test]
    fn limit_serde_uses_unlimited_sentinel() {
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "\"unlimited\"");
        assert_eq!(serde_json::to_string(&Limit::At(25)).unwrap(), "25");

        let parsed: Limit = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(parsed, Limit::Unlimited);
        let parsed: Limit = serde_json::from_str("100").unwrap();
        assert_eq!(parsed, Limit::At(100));
    }
}
