//! LeadPilot Background Worker
//!
//! Handles scheduled jobs:
//! - Billing-cycle reset sweep (every 10 minutes), a backstop for idle
//!   workspaces that never trigger a compute-on-read rollover
//! - Cleanup of aged processed payment events (daily at 4:00 AM UTC)

use std::time::Duration;

use leadpilot_entitlement::CycleResetter;
use leadpilot_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Processed payment events older than this are deleted; long enough that
/// any gateway redelivery window has closed.
const PAYMENT_EVENT_RETENTION_DAYS: i32 = 90;

async fn cleanup_payment_events(pool: &sqlx::PgPool) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query(
        "DELETE FROM payment_events WHERE processed_at < NOW() - make_interval(days => $1)",
    )
    .bind(PAYMENT_EVENT_RETENTION_DAYS)
    .execute(pool)
    .await?;
    Ok(deleted.rows_affected())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting LeadPilot Worker v{}", env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url, 5).await?;
    info!("Database pool created");

    let scheduler = JobScheduler::new().await?;

    // Job 1: Billing-cycle reset sweep every 10 minutes
    let sweep_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let resetter = CycleResetter::new(sweep_pool.clone());
            Box::pin(async move {
                info!("Running scheduled billing-cycle sweep");
                match resetter.sweep(OffsetDateTime::now_utc()).await {
                    Ok(outcome) => {
                        if !outcome.failed.is_empty() {
                            for (workspace_id, err) in &outcome.failed {
                                error!(workspace_id = %workspace_id, error = %err, "workspace reset failed");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "billing-cycle sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: billing-cycle sweep (every 10 minutes)");

    // Job 2: Daily cleanup of aged processed payment events (4:00 AM UTC)
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                match cleanup_payment_events(&pool).await {
                    Ok(deleted) => info!(deleted, "payment event cleanup complete"),
                    Err(e) => error!(error = %e, "payment event cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: payment event cleanup (daily 04:00 UTC)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the process alive; jobs run on the scheduler's own tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(300)).await;
        info!("Worker heartbeat");
    }
}
