//! Anthropic Messages API implementation of the LLM port.
//!
//! Requests are throttled by a local rate limiter, sent with an explicit
//! timeout, and retried on transport failures with jittered exponential
//! backoff. A 429 is transient until retries are exhausted, at which point
//! it surfaces as `RateLimited`.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::domain::models::LlmConfig;
use crate::domain::ports::{LlmClient, LlmError, LlmRequest};

const API_VERSION: &str = "2023-06-01";
const TRANSPORT_RETRIES: u32 = 3;

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicLlmClient {
    config: LlmConfig,
    client: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl AnthropicLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::TransportFailure(format!("failed to build client: {e}")))?;

        let per_minute = NonZeroU32::new(config.requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            config,
            client,
            limiter,
        })
    }

    fn api_key(&self) -> Result<String, LlmError> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                LlmError::TransportFailure("ANTHROPIC_API_KEY not configured".to_string())
            })
    }

    fn build_request(&self, request: &LlmRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: request.max_tokens.min(self.config.max_tokens),
            system: if request.system_prompt.is_empty() {
                None
            } else {
                Some(request.system_prompt.clone())
            },
            messages: vec![Message {
                role: "user",
                content: request.user_prompt.clone(),
            }],
            temperature: request.temperature,
        }
    }

    async fn send_once(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let body = self.build_request(request);

        self.limiter.until_ready().await;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(request.timeout_ms)
                } else {
                    LlmError::TransportFailure(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::TransportFailure(format!("API error {status}: {text}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("unparseable response body: {e}")))?;

        let text = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("response carried no text".to_string()));
        }

        Ok(text)
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(8))
            .with_max_elapsed_time(None)
            .build();

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..=TRANSPORT_RETRIES {
            match self.send_once(&request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = TRANSPORT_RETRIES + 1,
                        error = %err,
                        "Transient LLM failure, backing off"
                    );
                    last_error = Some(err);
                    if attempt < TRANSPORT_RETRIES {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::TransportFailure("retries exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: Some("test-key".to_string()),
            base_url,
            requests_per_minute: 600,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_body(r#"{"content": [{"type": "text", "text": "hello"}]}"#)
            .create_async()
            .await;

        let client = AnthropicLlmClient::new(test_config(server.url())).unwrap();
        let text = client
            .complete(LlmRequest::new("sys", "user"))
            .await
            .unwrap();

        assert_eq!(text, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_body("slow down")
            .expect(4)
            .create_async()
            .await;

        let client = AnthropicLlmClient::new(test_config(server.url())).unwrap();
        let err = client
            .complete(LlmRequest::new("sys", "user").with_timeout_ms(5_000))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::RateLimited));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let mut server = mockito::Server::new_async().await;
        let failure = server
            .mock("POST", "/v1/messages")
            .with_status(503)
            .with_body("overloaded")
            .expect(1)
            .create_async()
            .await;
        let success = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content": [{"type": "text", "text": "recovered"}]}"#)
            .create_async()
            .await;

        let client = AnthropicLlmClient::new(test_config(server.url())).unwrap();
        let text = client.complete(LlmRequest::new("s", "u")).await.unwrap();

        assert_eq!(text, "recovered");
        failure.assert_async().await;
        success.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_response_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content": []}"#)
            .create_async()
            .await;

        let client = AnthropicLlmClient::new(test_config(server.url())).unwrap();
        let err = client.complete(LlmRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
