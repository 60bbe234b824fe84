//! Application state

use leadpilot_entitlement::{
    CycleResetter, EntitlementResolver, OperationGate, PaymentWebhookProcessor, PlanCatalog,
    UsageLogger,
};
use reqwest::Client;
use sqlx::PgPool;

use crate::{
    ai::AiClient,
    auth::{AuthState, TokenVerifier},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub resolver: EntitlementResolver,
    pub gate: OperationGate,
    pub catalog: PlanCatalog,
    pub usage_logger: UsageLogger,
    pub resetter: CycleResetter,
    pub webhooks: PaymentWebhookProcessor,
    pub ai: AiClient,
    verifier: TokenVerifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let http_client = Client::new();
        let verifier = TokenVerifier::new(
            http_client.clone(),
            config.identity_verify_url.clone(),
            config.identity_api_key.clone(),
        );
        let ai = AiClient::new(
            http_client,
            config.ai_provider_url.clone(),
            config.ai_provider_key.clone(),
            config.ai_request_timeout_secs,
        );
        Self {
            resolver: EntitlementResolver::new(pool.clone()),
            gate: OperationGate::new(pool.clone()),
            catalog: PlanCatalog::new(pool.clone()),
            usage_logger: UsageLogger::new(pool.clone()),
            resetter: CycleResetter::new(pool.clone()),
            webhooks: PaymentWebhookProcessor::new(
                pool.clone(),
                config.payment_webhook_secret.clone(),
            ),
            ai,
            verifier,
            pool,
            config,
        }
    }

    /// State slice for the auth middleware layer.
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            pool: self.pool.clone(),
            verifier: self.verifier.clone(),
        }
    }
}
