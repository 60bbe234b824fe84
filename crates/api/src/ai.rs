//! Generative-text provider client
//!
//! Thin wrapper over the provider's chat endpoint. Transient failures retry
//! twice on a fixed short delay; the caller only charges credits after a
//! successful response.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_retry::{strategy::FixedInterval, Retry};

use crate::error::{ApiError, ApiResult};

const RETRY_DELAY_MS: u64 = 500;
const RETRY_ATTEMPTS: usize = 2;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Clone)]
pub struct AiClient {
    http_client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl AiClient {
    pub fn new(http_client: Client, url: String, api_key: String, timeout_secs: u64) -> Self {
        Self {
            http_client,
            url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Generate outreach copy for a prompt in the requested tone.
    pub async fn generate(&self, prompt: &str, tone: &str) -> ApiResult<String> {
        let strategy = FixedInterval::from_millis(RETRY_DELAY_MS).take(RETRY_ATTEMPTS);

        let body = json!({
            "model": "gpt-4o-mini",
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You write concise B2B outreach copy. Tone: {tone}."
                    )
                },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": 600
        });

        let response = Retry::spawn(strategy, || async {
            let resp = self
                .http_client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| ApiError::AiProvider(e.to_string()))?;

            // 4xx is our bug or quota; retrying cannot help.
            let status = resp.status();
            if status.is_server_error() {
                return Err(ApiError::AiProvider(format!("provider returned {status}")));
            }
            Ok(resp)
        })
        .await?;

        if !response.status().is_success() {
            return Err(ApiError::AiProvider(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ApiError::AiProvider(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::AiProvider("provider returned no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(url: String) -> AiClient {
        AiClient::new(Client::new(), url, "test-key".to_string(), 5)
    }

    #[tokio::test]
    async fn successful_generation_returns_the_first_choice() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"Hi there"}}]}"#)
            .create_async()
            .await;

        let client = client_for(format!("{}/v1/chat/completions", server.url()));
        let text = client.generate("say hi", "friendly").await.unwrap();
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn persistent_5xx_exhausts_the_retry_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gen")
            .with_status(503)
            .expect(1 + RETRY_ATTEMPTS)
            .create_async()
            .await;

        let client = client_for(format!("{}/gen", server.url()));
        assert!(client.generate("p", "neutral").await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_surface_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gen")
            .with_status(400)
            .with_body(r#"{"error":"bad request"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(format!("{}/gen", server.url()));
        assert!(client.generate("p", "neutral").await.is_err());
        mock.assert_async().await;
    }
}
