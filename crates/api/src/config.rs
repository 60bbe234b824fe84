//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Identity provider (token verification is delegated)
    pub identity_verify_url: String,
    pub identity_api_key: Option<String>,

    // Scheduled-endpoint protection
    pub cron_secret: String,

    // Payment gateway
    pub payment_webhook_secret: String,

    // AI provider
    pub ai_provider_url: String,
    pub ai_provider_key: String,
    pub ai_request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            identity_verify_url: env::var("IDENTITY_VERIFY_URL")
                .map_err(|_| ConfigError::Missing("IDENTITY_VERIFY_URL"))?,
            identity_api_key: env::var("IDENTITY_API_KEY").ok(),

            cron_secret: {
                let secret =
                    env::var("CRON_SECRET").map_err(|_| ConfigError::Missing("CRON_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "CRON_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            payment_webhook_secret: {
                let secret = env::var("PAYMENT_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::Missing("PAYMENT_WEBHOOK_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "PAYMENT_WEBHOOK_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            ai_provider_url: env::var("AI_PROVIDER_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            ai_provider_key: env::var("AI_PROVIDER_KEY").unwrap_or_default(),
            ai_request_timeout_secs: env::var("AI_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("{0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test so they
    // cannot race each other.
    #[test]
    fn weak_secrets_are_rejected() {
        let vars = [
            ("DATABASE_URL", "postgres://localhost/leadpilot"),
            ("IDENTITY_VERIFY_URL", "https://id.example.com/verify"),
            ("CRON_SECRET", "short"),
            (
                "PAYMENT_WEBHOOK_SECRET",
                "a-long-enough-webhook-secret-value-here",
            ),
        ];
        for (k, v) in vars {
            std::env::set_var(k, v);
        }

        match Config::from_env() {
            Err(ConfigError::WeakSecret(msg)) => assert!(msg.contains("CRON_SECRET")),
            other => panic!("expected weak-secret rejection, got {other:?}"),
        }

        std::env::set_var("CRON_SECRET", "a-long-enough-cron-secret-value-here-ok");
        let config = Config::from_env().unwrap();
        assert_eq!(config.database_max_connections, 20);

        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }
}
