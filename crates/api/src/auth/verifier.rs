//! Delegated token verification

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

/// Cache verification results briefly so dashboard fan-out does not hammer
/// the identity provider.
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Bound the cache so a flood of unique tokens cannot exhaust memory.
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Identity confirmed by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedIdentity {
    /// Provider-side subject id, stable across sessions
    #[serde(alias = "sub", alias = "id")]
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Clone)]
struct CachedIdentity {
    identity: VerifiedIdentity,
    cached_at: Instant,
}

/// HTTP client for the identity provider's verification endpoint.
#[derive(Clone)]
pub struct TokenVerifier {
    http_client: Client,
    verify_url: String,
    api_key: Option<String>,
    cache: Arc<RwLock<HashMap<String, CachedIdentity>>>,
}

impl TokenVerifier {
    pub fn new(http_client: Client, verify_url: String, api_key: Option<String>) -> Self {
        Self {
            http_client,
            verify_url,
            api_key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Verify a Bearer token. `None` means the provider rejected it; errors
    /// from the provider itself (network, 5xx) also verify as `None` so a
    /// flaky provider can never mint identities.
    pub async fn verify(&self, token: &str) -> Option<VerifiedIdentity> {
        {
            let cache = self.cache.read().await;
            if let Some(hit) = cache.get(token) {
                if hit.cached_at.elapsed() < TOKEN_CACHE_TTL {
                    return Some(hit.identity.clone());
                }
            }
        }

        let mut request = self
            .http_client
            .get(&self.verify_url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(5));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "identity provider unreachable");
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        let identity: VerifiedIdentity = match response.json().await {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, "identity provider returned malformed body");
                return None;
            }
        };

        let mut cache = self.cache.write().await;
        if cache.len() >= MAX_CACHE_ENTRIES {
            // Drop the stalest entry to stay bounded.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, v)| v.cached_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(
            token.to_string(),
            CachedIdentity {
                identity: identity.clone(),
                cached_at: Instant::now(),
            },
        );

        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier_for(url: String) -> TokenVerifier {
        TokenVerifier::new(Client::new(), url, None)
    }

    #[tokio::test]
    async fn valid_token_yields_an_identity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/verify")
            .match_header("authorization", "Bearer good-token")
            .with_status(200)
            .with_body(r#"{"sub":"user-123","email":"a@b.test"}"#)
            .create_async()
            .await;

        let verifier = verifier_for(format!("{}/verify", server.url()));
        let identity = verifier.verify("good-token").await.unwrap();
        assert_eq!(identity.subject, "user-123");
        assert_eq!(identity.email.as_deref(), Some("a@b.test"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_token_verifies_as_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/verify")
            .with_status(401)
            .with_body(r#"{"error":"invalid token"}"#)
            .create_async()
            .await;

        let verifier = verifier_for(format!("{}/verify", server.url()));
        assert!(verifier.verify("bad-token").await.is_none());
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/verify")
            .with_status(200)
            .with_body(r#"{"sub":"user-cache"}"#)
            .expect(1)
            .create_async()
            .await;

        let verifier = verifier_for(format!("{}/verify", server.url()));
        assert!(verifier.verify("token").await.is_some());
        assert!(verifier.verify("token").await.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_provider_fails_closed() {
        let verifier = verifier_for("http://127.0.0.1:1/verify".to_string());
        assert!(verifier.verify("any").await.is_none());
    }
}
