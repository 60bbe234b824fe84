//! Integration tests for the entitlement engine against a real database.
//!
//! ## Running
//! ```bash
//! export DATABASE_URL="postgres://localhost/leadpilot_test"
//! cargo test -p leadpilot-entitlement -- --ignored --test-threads=1
//! ```
//! Migrations must be applied to the test database first.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use leadpilot_entitlement::{
    AckStatus, CycleResetter, EntitlementError, EntitlementResolver, OperationGate, OperationKind,
    PaymentWebhookProcessor,
};
use leadpilot_shared::{Limit, PlanTier, UserId, WorkspaceId};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "test-webhook-secret-0123456789abcdef0123";

async fn test_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to test database")
}

/// Seed a workspace on `tier` with one owner, next_reset one cycle out.
async fn seed_workspace(pool: &PgPool, tier: PlanTier) -> (WorkspaceId, UserId) {
    let workspace_id = WorkspaceId::new();
    let user_id = UserId::new();

    sqlx::query("INSERT INTO users (id, email, display_name) VALUES ($1, $2, $3)")
        .bind(user_id.0)
        .bind(format!("{}@test.leadpilot.dev", user_id.0))
        .bind("Test User")
        .execute(pool)
        .await
        .expect("seed user");

    sqlx::query(
        "INSERT INTO workspaces (id, name, owner_id, plan_id, next_reset)
         VALUES ($1, $2, $3, $4, NOW() + INTERVAL '30 days')",
    )
    .bind(workspace_id.0)
    .bind(format!("ws-{}", workspace_id.0))
    .bind(user_id.0)
    .bind(tier.to_string())
    .execute(pool)
    .await
    .expect("seed workspace");

    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, 'owner')",
    )
    .bind(workspace_id.0)
    .bind(user_id.0)
    .execute(pool)
    .await
    .expect("seed membership");

    (workspace_id, user_id)
}

async fn credits_used(pool: &PgPool, workspace_id: WorkspaceId) -> i64 {
    sqlx::query_scalar(
        "SELECT credits_used FROM usage_ledgers
         WHERE workspace_id = $1 ORDER BY period_start DESC LIMIT 1",
    )
    .bind(workspace_id.0)
    .fetch_optional(pool)
    .await
    .expect("read ledger")
    .unwrap_or(0)
}

fn sign(body: &[u8]) -> String {
    use hmac::Mac;
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
#[ignore]
async fn charge_then_deny_at_the_credit_boundary() {
    let pool = test_pool().await;
    let (workspace_id, user_id) = seed_workspace(&pool, PlanTier::Free).await;
    let gate = OperationGate::new(pool.clone());

    // Burn 48 of the 50 free credits.
    for _ in 0..48 {
        gate.consume(workspace_id, Some(user_id), OperationKind::AiGeneration, None, None)
            .await
            .expect("charge within allowance");
    }

    let outcome = gate
        .consume(workspace_id, Some(user_id), OperationKind::AiGeneration, None, None)
        .await
        .expect("49th credit still fits");
    assert_eq!(outcome.credits_used, 49);
    assert_eq!(outcome.credits_remaining, Limit::At(1));

    // A 5-credit charge no longer fits; nothing may be written.
    let err = gate
        .consume(
            workspace_id,
            Some(user_id),
            OperationKind::AiGeneration,
            Some(5),
            None,
        )
        .await
        .expect_err("overdraft must be denied");
    assert!(matches!(err, EntitlementError::Denied(_)));
    assert_eq!(credits_used(&pool, workspace_id).await, 49);
}

#[tokio::test]
#[ignore]
async fn concurrent_charges_never_overspend() {
    let pool = test_pool().await;
    let (workspace_id, user_id) = seed_workspace(&pool, PlanTier::Free).await;

    let mut handles = Vec::new();
    for _ in 0..60 {
        let gate = OperationGate::new(pool.clone());
        handles.push(tokio::spawn(async move {
            gate.consume(workspace_id, Some(user_id), OperationKind::AiGeneration, None, None)
                .await
        }));
    }

    let mut granted = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(_) => granted += 1,
            Err(EntitlementError::Denied(_)) => denied += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Free allowance is 50: exactly 50 land, the rest are denied.
    assert_eq!(granted, 50);
    assert_eq!(denied, 10);
    assert_eq!(credits_used(&pool, workspace_id).await, 50);
}

#[tokio::test]
#[ignore]
async fn sweep_is_idempotent_across_double_runs() {
    let pool = test_pool().await;
    let (workspace_id, user_id) = seed_workspace(&pool, PlanTier::Starter).await;
    let gate = OperationGate::new(pool.clone());

    gate.consume(workspace_id, Some(user_id), OperationKind::LightScrape, None, None)
        .await
        .expect("charge before reset");

    // Force the boundary into the past.
    sqlx::query("UPDATE workspaces SET next_reset = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(workspace_id.0)
        .execute(&pool)
        .await
        .expect("rewind next_reset");

    let resetter = CycleResetter::new(pool.clone());
    let now = OffsetDateTime::now_utc();
    let first = resetter.sweep(now).await.expect("first sweep");
    assert!(first.reset >= 1);

    let second = resetter.sweep(now).await.expect("second sweep");
    assert_eq!(second.reset, 0, "second sweep must observe the rollover already done");

    assert_eq!(credits_used(&pool, workspace_id).await, 0);

    let next_reset: OffsetDateTime =
        sqlx::query_scalar("SELECT next_reset FROM workspaces WHERE id = $1")
            .bind(workspace_id.0)
            .fetch_one(&pool)
            .await
            .expect("read next_reset");
    assert!(next_reset > now);
}

#[tokio::test]
#[ignore]
async fn replayed_webhook_applies_exactly_once() {
    let pool = test_pool().await;
    let (workspace_id, user_id) = seed_workspace(&pool, PlanTier::Free).await;
    let gate = OperationGate::new(pool.clone());

    gate.consume(workspace_id, Some(user_id), OperationKind::AiGeneration, None, None)
        .await
        .expect("charge before upgrade");

    let processor = PaymentWebhookProcessor::new(pool.clone(), WEBHOOK_SECRET.to_string());
    let event_id = format!("evt_{}", Uuid::new_v4());
    let body = serde_json::json!({
        "id": event_id,
        "type": "subscription.activated",
        "data": {
            "workspace_id": workspace_id.0,
            "plan": "pro",
            "subscription_id": "sub_test",
            "customer_id": "cus_test"
        }
    });
    let body = serde_json::to_vec(&body).unwrap();
    let sig = sign(&body);

    let first = processor.handle(&body, &sig).await.expect("first delivery");
    assert_eq!(first.status, AckStatus::Processed);

    let second = processor.handle(&body, &sig).await.expect("replay");
    assert_eq!(second.status, AckStatus::AlreadyProcessed);

    let plan: String = sqlx::query_scalar("SELECT plan_id FROM workspaces WHERE id = $1")
        .bind(workspace_id.0)
        .fetch_one(&pool)
        .await
        .expect("read plan");
    assert_eq!(plan, "pro");
    // Upgrade starts a fresh period.
    assert_eq!(credits_used(&pool, workspace_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn resolver_reports_remaining_headroom() {
    let pool = test_pool().await;
    let (workspace_id, user_id) = seed_workspace(&pool, PlanTier::Starter).await;
    let gate = OperationGate::new(pool.clone());

    gate.consume(
        workspace_id,
        Some(user_id),
        OperationKind::LightScrape,
        Some(10),
        None,
    )
    .await
    .expect("charge");

    let resolver = EntitlementResolver::new(pool.clone());
    let snapshot = resolver.resolve(user_id).await.expect("resolve");

    assert_eq!(snapshot.workspace_id, workspace_id);
    assert_eq!(snapshot.plan.tier, PlanTier::Starter);
    assert_eq!(snapshot.usage.credits_used, 10);
    assert_eq!(snapshot.remaining.credits, Limit::At(490));
    assert_eq!(snapshot.remaining.light_scrapes, Limit::At(199));
    assert!(!snapshot.can_deep_scrape);
    assert_eq!(snapshot.member_count, 1);
}

#[tokio::test]
#[ignore]
async fn resolver_rejects_users_without_a_workspace() {
    let pool = test_pool().await;
    let resolver = EntitlementResolver::new(pool);

    let err = resolver
        .resolve(UserId::new())
        .await
        .expect_err("orphan user must not resolve");
    assert!(matches!(err, EntitlementError::NoWorkspace));
}
