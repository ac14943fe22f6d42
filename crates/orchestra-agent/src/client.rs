//! HTTP client for OpenAI-compatible chat completion endpoints
//!
//! Each completion is a single stateless user message at the configured
//! temperature. Rate limits and server errors are retried with exponential
//! backoff; persistent failures trip the client's circuit breaker.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::oracle::Oracle;
use crate::types::{ChatMessage, ChatRequest, ChatResponse};
use async_trait::async_trait;
use orchestra_core::config::OracleConfig;
use orchestra_core::{OrchestraError, Result};
use std::time::Duration;
use tracing::instrument;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Retry behaviour for rate limits and 5xx responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Oracle backed by a chat completion API
pub struct OracleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OracleClient {
    /// Build a client from config, reading the API key from the environment
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = auth::api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    /// Build a client with an explicit API key
    pub fn new(config: &OracleConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| OrchestraError::Oracle(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            breaker: CircuitBreaker::default(),
        })
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_for(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Oracle for OracleClient {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        if !self.breaker.can_execute() {
            return Err(OrchestraError::OracleLimit(format!(
                "Circuit breaker is OPEN after repeated failures. Retry in {}s.",
                self.breaker.time_until_retry().as_secs()
            )));
        }

        let request = self.request_for(prompt);
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            tracing::debug!("Sending completion request (attempt {})", retries + 1);

            let response = match self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(OrchestraError::Oracle(format!("Failed to send request: {}", e)));
                }
            };

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > self.retry.max_retries {
                    let body = response.text().await.unwrap_or_else(|_| "Unknown".to_string());
                    self.breaker.record_failure();
                    return Err(OrchestraError::OracleLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        self.retry.max_retries, body
                    )));
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "Rate limited (429). Waiting {:?} before retry {}/{}",
                    wait,
                    retries,
                    self.retry.max_retries
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(self.retry.max_backoff);
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < self.retry.max_retries {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {:?} before retry {}/{}",
                        status,
                        backoff,
                        retries,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                    continue;
                }

                self.breaker.record_failure();
                tracing::error!(
                    "Oracle request failed with {} (breaker failures: {})",
                    status,
                    self.breaker.failure_count()
                );
                return Err(OrchestraError::Oracle(format!(
                    "Oracle API error {}: {}",
                    status, body
                )));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| OrchestraError::Oracle(format!("Failed to parse response: {}", e)))?;

            let text = parsed
                .first_text()
                .ok_or_else(|| OrchestraError::Oracle("No content in response".to_string()))?
                .to_string();

            self.breaker.record_success();

            match &parsed.usage {
                Some(usage) => tracing::info!(
                    "Completion received ({} chars, {} prompt tokens, {} completion tokens)",
                    text.len(),
                    usage.prompt_tokens,
                    usage.completion_tokens
                ),
                None => tracing::info!("Completion received ({} chars)", text.len()),
            }

            return Ok(text);
        }
    }
}
