#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadPilot API Server
//!
//! HTTP surface over the entitlement engine: credit charging, plan data,
//! workspace management, the payment webhook, and the scheduled reset
//! endpoint.

mod ai;
mod auth;
mod config;
mod error;
mod routes;
mod state;

use leadpilot_shared::create_pool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leadpilot_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LeadPilot API v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connection established");

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
