//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leadpilot_entitlement::{DenyReason, EntitlementError};
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resources
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),
    #[error("No workspace found")]
    NoWorkspace,

    // Entitlements
    #[error("{reason}")]
    LimitExceeded { reason: DenyReason },

    // Webhooks
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Upstream providers
    #[error("AI provider error: {0}")]
    AiProvider(String),

    // Internal
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service busy, please retry")]
    Busy,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED".to_string(),
                self.to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN".to_string(),
                self.to_string(),
            ),

            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR".to_string(),
                msg.clone(),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                msg.clone(),
            ),

            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                self.to_string(),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT".to_string(), msg.clone()),
            ApiError::NoWorkspace => (
                StatusCode::NOT_FOUND,
                "NO_WORKSPACE".to_string(),
                "No workspace found. Please create a workspace first.".to_string(),
            ),

            // Feature gates are 403, spend limits are 402.
            ApiError::LimitExceeded { reason } => {
                let status = match reason {
                    DenyReason::DeepScraperNotAllowed | DenyReason::MemberLimitReached => {
                        StatusCode::FORBIDDEN
                    }
                    _ => StatusCode::PAYMENT_REQUIRED,
                };
                (status, reason.code().to_string(), reason.to_string())
            }

            ApiError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE".to_string(),
                self.to_string(),
            ),

            ApiError::AiProvider(_) => (
                StatusCode::BAD_GATEWAY,
                "AI_PROVIDER_ERROR".to_string(),
                "AI provider request failed".to_string(),
            ),

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR".to_string(),
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                self.to_string(),
            ),
            ApiError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BUSY".to_string(),
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("23505") {
                    return ApiError::Conflict("Resource already exists".to_string());
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<EntitlementError> for ApiError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::NoWorkspace => ApiError::NoWorkspace,
            EntitlementError::WorkspaceNotFound(_) => ApiError::NotFound,
            EntitlementError::Denied(reason) => ApiError::LimitExceeded { reason },
            EntitlementError::CostOutOfRange(cost) => {
                ApiError::BadRequest(format!("cost {cost} exceeds the per-charge maximum"))
            }
            EntitlementError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            EntitlementError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            EntitlementError::Contention(msg) => {
                tracing::warn!(detail = %msg, "request aborted under contention");
                ApiError::Busy
            }
            EntitlementError::PlanNotFound(tier) => {
                tracing::error!(tier = %tier, "workspace assigned an unknown plan tier");
                ApiError::Internal
            }
            EntitlementError::Database(msg) => ApiError::Database(msg),
            EntitlementError::Internal(msg) => {
                tracing::error!(detail = %msg, "entitlement internal error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reasons_map_to_the_right_status() {
        let spend = ApiError::LimitExceeded {
            reason: DenyReason::InsufficientCredits,
        };
        assert_eq!(
            spend.into_response().status(),
            StatusCode::PAYMENT_REQUIRED
        );

        let feature = ApiError::LimitExceeded {
            reason: DenyReason::DeepScraperNotAllowed,
        };
        assert_eq!(feature.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn no_workspace_maps_to_404() {
        let err: ApiError = EntitlementError::NoWorkspace.into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
