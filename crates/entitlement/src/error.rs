//! Entitlement error types

use thiserror::Error;

use crate::gate::DenyReason;

/// Entitlement-specific errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// The identity has no workspace pointer; the caller should provision one.
    #[error("No workspace found for user")]
    NoWorkspace,

    /// Catalog corruption: a workspace is assigned a tier the catalog does not
    /// know. Fatal, surfaced as 500.
    #[error("Plan not found in catalog: {0}")]
    PlanNotFound(String),

    /// A limit check failed. Carries the closed denial code so HTTP and UI
    /// layers can branch without string matching.
    #[error("Operation denied: {0}")]
    Denied(DenyReason),

    /// Charge cost above the per-charge maximum. Malformed input, not a
    /// spend decision; rejected before any rule or counter is touched.
    #[error("Cost {0} exceeds the per-charge maximum")]
    CostOutOfRange(u64),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Transaction kept aborting under contention after bounded retries.
    #[error("Storage contention: {0}")]
    Contention(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for EntitlementError {
    fn from(err: sqlx::Error) -> Self {
        // Transient aborts (SQLSTATE 40001 serialization_failure, 40P01
        // deadlock_detected) map to Contention so callers can retry bounded.
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
                return EntitlementError::Contention(db_err.to_string());
            }
        }
        EntitlementError::Database(err.to_string())
    }
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;
