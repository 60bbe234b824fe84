//! Payment webhook processor
//!
//! Verifies the gateway signature over the raw request body, then applies
//! plan changes exactly once per event id. The idempotency claim, the plan
//! update, and the fresh ledger period all commit in one transaction, so a
//! redelivered event either sees its claim already taken or replays nothing.

use hmac::{Hmac, Mac};
use leadpilot_shared::{PlanTier, WorkspaceId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{PgPool, Row};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::LedgerStore;
use crate::reset::CYCLE_PERIOD;

type HmacSha256 = Hmac<Sha256>;

/// Event envelope as the payment gateway delivers it.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "id")]
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub workspace_id: Uuid,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Processed,
    AlreadyProcessed,
    Ignored,
}

/// Body returned to the gateway. Always 200-shaped; the gateway only needs
/// to know the delivery landed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub status: AckStatus,
}

impl WebhookAck {
    fn with(status: AckStatus) -> Self {
        Self {
            received: true,
            status,
        }
    }
}

/// Constant-time check of a hex HMAC-SHA256 signature over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.ct_eq(provided.as_slice()).into()
}

#[derive(Clone)]
pub struct PaymentWebhookProcessor {
    pool: PgPool,
    secret: String,
}

impl PaymentWebhookProcessor {
    pub fn new(pool: PgPool, secret: String) -> Self {
        Self { pool, secret }
    }

    /// Verify and apply one delivery. Signature failure is an error (the
    /// gateway gets a 401 and retries); duplicates and unknown event types
    /// are acknowledged values.
    pub async fn handle(&self, body: &[u8], signature: &str) -> EntitlementResult<WebhookAck> {
        if !verify_signature(&self.secret, body, signature) {
            return Err(EntitlementError::WebhookSignatureInvalid);
        }

        let event: PaymentEvent = serde_json::from_slice(body)
            .map_err(|e| EntitlementError::InvalidPayload(e.to_string()))?;

        match event.event_type.as_str() {
            "subscription.activated" | "subscription.paid" => {
                let plan = event.data.plan.as_deref().ok_or_else(|| {
                    EntitlementError::InvalidPayload(format!(
                        "{} event without a plan",
                        event.event_type
                    ))
                })?;
                let tier = plan
                    .parse::<PlanTier>()
                    .map_err(EntitlementError::InvalidPayload)?;
                // A paid plan change starts a fresh cycle immediately.
                self.apply(&event, tier, true).await
            }
            // Downgrade at period end: the current ledger keeps running and
            // the next rollover happens under the free allowance.
            "subscription.canceled" => self.apply(&event, PlanTier::Free, false).await,
            other => {
                tracing::info!(event_id = %event.event_id, event_type = %other, "ignoring unhandled webhook event type");
                Ok(WebhookAck::with(AckStatus::Ignored))
            }
        }
    }

    /// One transaction: claim the event id, move the workspace to its new
    /// tier, and (for paid changes) start a zeroed ledger period one cycle
    /// out.
    async fn apply(
        &self,
        event: &PaymentEvent,
        tier: PlanTier,
        restart_cycle: bool,
    ) -> EntitlementResult<WebhookAck> {
        let now = OffsetDateTime::now_utc();
        let workspace_id = WorkspaceId(event.data.workspace_id);
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO payment_events (event_id, event_type, workspace_id, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(workspace_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tracing::info!(event_id = %event.event_id, "duplicate webhook delivery, acknowledging without effect");
            tx.rollback().await?;
            return Ok(WebhookAck::with(AckStatus::AlreadyProcessed));
        }

        let updated = if restart_cycle {
            let next_reset = now + CYCLE_PERIOD;
            let updated = sqlx::query(
                r#"
                UPDATE workspaces SET
                    plan_id = $2,
                    subscription_id = COALESCE($3, subscription_id),
                    customer_id = COALESCE($4, customer_id),
                    next_reset = $5,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(workspace_id.0)
            .bind(tier.to_string())
            .bind(&event.data.subscription_id)
            .bind(&event.data.customer_id)
            .bind(next_reset)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 1 {
                LedgerStore::start_period(&mut *tx, workspace_id, now.date(), next_reset).await?;
            }
            updated
        } else {
            sqlx::query(
                "UPDATE workspaces SET plan_id = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(workspace_id.0)
            .bind(tier.to_string())
            .execute(&mut *tx)
            .await?
        };

        if updated.rows_affected() != 1 {
            // Keep the claim unspent so a later redelivery can land once the
            // workspace exists.
            tx.rollback().await?;
            return Err(EntitlementError::WorkspaceNotFound(
                workspace_id.to_string(),
            ));
        }

        tx.commit().await?;

        tracing::info!(
            event_id = %event.event_id,
            workspace_id = %workspace_id,
            plan = %tier,
            "payment event applied"
        );
        Ok(WebhookAck::with(AckStatus::Processed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"id":"evt_1","type":"payment.succeeded"}"#;
        let sig = sign(SECRET, body);
        assert!(verify_signature(SECRET, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = br#"{"id":"evt_1","type":"payment.succeeded"}"#;
        let sig = sign(SECRET, body);
        let tampered = br#"{"id":"evt_2","type":"payment.succeeded"}"#;
        assert!(!verify_signature(SECRET, tampered, &sig));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = b"payload";
        let sig = sign("another-secret-another-secret-xx", body);
        assert!(!verify_signature(SECRET, body, &sig));
    }

    #[test]
    fn malformed_hex_fails_closed() {
        assert!(!verify_signature(SECRET, b"payload", "not-hex"));
        assert!(!verify_signature(SECRET, b"payload", ""));
    }

    #[test]
    fn event_envelope_parses() {
        let body = r#"{
            "id": "evt_42",
            "type": "subscription.updated",
            "data": {
                "workspace_id": "6f5f0000-0000-0000-0000-000000000042",
                "plan": "pro",
                "subscription_id": "sub_9",
                "customer_id": "cus_9"
            }
        }"#;
        let event: PaymentEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_id, "evt_42");
        assert_eq!(event.event_type, "subscription.updated");
        assert_eq!(event.data.plan.as_deref(), Some("pro"));
    }

    #[test]
    fn ack_serializes_with_received_flag() {
        let ack = WebhookAck::with(AckStatus::AlreadyProcessed);
        let json = serde_json::to_value(ack).unwrap();
        assert_eq!(json["received"], true);
        assert_eq!(json["status"], "already_processed");
    }
}
