//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use leadpilot_shared::UserId;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::verifier::TokenVerifier;
use crate::error::ApiError;

/// Authenticated caller, inserted as a request extension by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub pool: PgPool,
    pub verifier: TokenVerifier,
}

/// Require a valid Bearer token on the request. Verified identities are
/// upserted into `users` so the rest of the system can key on our own ids.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let identity = state
        .verifier
        .verify(token)
        .await
        .ok_or(ApiError::Unauthorized)?;

    let row = sqlx::query(
        r#"
        INSERT INTO users (id, external_id, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (external_id) DO UPDATE
            SET email = COALESCE(EXCLUDED.email, users.email)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&identity.subject)
    .bind(&identity.email)
    .fetch_one(&state.pool)
    .await?;
    let user_id: Uuid = row.try_get("id")?;

    request.extensions_mut().insert(AuthUser {
        user_id: UserId(user_id),
        email: identity.email,
    });

    Ok(next.run(request).await)
}
