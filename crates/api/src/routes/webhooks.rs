//! Payment gateway webhook endpoint

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use leadpilot_entitlement::WebhookAck;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "x-pay-signature";

/// Receive a payment gateway delivery. The signature covers the raw body,
/// so this handler takes `Bytes` and never re-serializes.
pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    let ack = state.webhooks.handle(&body, signature).await?;
    Ok(Json(ack))
}
