//! Reasoning service adapters.
//!
//! ```text
//! Agent ──▶ CachedReasoner ──▶ RetryingReasoner ──▶ HttpReasoner ──▶ backend
//!              │ hit
//!              └──────────────▶ (no call)
//! ```
//!
//! Each adapter implements `ReasoningService` and wraps another, so the
//! stack is assembled by the caller and injected into worlds.

use crate::cache::ResponseCache;
use async_trait::async_trait;
use hive_env::{ReasoningService, SwarmError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_LLM_BASE_URL: &str = "HIVE_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "HIVE_LLM_API_KEY";
pub const ENV_LLM_MODEL: &str = "HIVE_LLM_MODEL";
pub const ENV_LLM_TIMEOUT_MS: &str = "HIVE_LLM_TIMEOUT_MS";
pub const ENV_LLM_MAX_TOKENS: &str = "HIVE_LLM_MAX_TOKENS";

pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 4096;

/// Instruction sent as the system message of every completion.
pub const JSON_SYSTEM_INSTRUCTION: &str =
    "You are a JSON generator. Always return valid JSON objects with no additional text.";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Connection settings for an OpenAI-compatible completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

impl ReasonerConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, SwarmError> {
        Self::from_getter(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_getter<F>(mut getter: F) -> Result<Self, SwarmError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = required(&mut getter, ENV_LLM_BASE_URL)?;
        let api_key = required(&mut getter, ENV_LLM_API_KEY)?;
        let model = required(&mut getter, ENV_LLM_MODEL)?;
        let timeout_ms = match getter(ENV_LLM_TIMEOUT_MS) {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                SwarmError::config(format!("invalid {}: {}", ENV_LLM_TIMEOUT_MS, value))
            })?,
            None => DEFAULT_LLM_TIMEOUT_MS,
        };
        let max_tokens = match getter(ENV_LLM_MAX_TOKENS) {
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                SwarmError::config(format!("invalid {}: {}", ENV_LLM_MAX_TOKENS, value))
            })?,
            None => DEFAULT_LLM_MAX_TOKENS,
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            timeout_ms,
            max_tokens,
        })
    }
}

fn required<F>(getter: &mut F, key: &str) -> Result<String, SwarmError>
where
    F: FnMut(&str) -> Option<String>,
{
    match getter(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(SwarmError::config(format!("empty env variable: {}", key))),
        None => Err(SwarmError::config(format!("missing env variable: {}", key))),
    }
}

// ============================================================================
// HTTP BACKEND
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Completion client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct HttpReasoner {
    config: ReasonerConfig,
    client: reqwest::Client,
}

impl HttpReasoner {
    /// Builds the HTTP client.
    pub fn new(config: ReasonerConfig) -> Result<Self, SwarmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| SwarmError::config(format!("client build failed: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Builds a client from environment variables.
    pub fn from_env() -> Result<Self, SwarmError> {
        Self::new(ReasonerConfig::from_env()?)
    }
}

#[async_trait]
impl ReasoningService for HttpReasoner {
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let payload = ChatCompletionRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
            messages: [
                ChatMessage {
                    role: "system",
                    content: JSON_SYSTEM_INSTRUCTION,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SwarmError::service(format!("http request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(SwarmError::service(format!("http status {}: {}", status.as_u16(), body)));
        }

        let decoded: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SwarmError::service(format!("decode response failed: {}", e)))?;

        decoded
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| SwarmError::service("empty completion choice"))
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Bounded retry with linearly increasing backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Delay after the first failure; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Retries transient failures of an inner service.
pub struct RetryingReasoner<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ReasoningService> RetryingReasoner<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: ReasoningService> ReasoningService for RetryingReasoner<S> {
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(attempt, error = %e, "Reasoning attempt failed, retrying");
                    tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reasoning failed");
                    return Err(e);
                }
            }
        }
    }
}

// ============================================================================
// CACHE FRONT
// ============================================================================

/// Answers repeated prompts from a `ResponseCache`.
pub struct CachedReasoner<S> {
    inner: S,
    cache: Arc<ResponseCache>,
    namespace: String,
}

impl<S: ReasoningService> CachedReasoner<S> {
    /// Wraps `inner`. `namespace` is the first cache input, so the same
    /// prompt sent to different backends or models does not collide.
    pub fn new(inner: S, cache: Arc<ResponseCache>, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            cache,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl<S: ReasoningService> ReasoningService for CachedReasoner<S> {
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        let inputs = [self.namespace.as_str(), prompt];
        if let Some(hit) = self.cache.get(&inputs) {
            debug!("Reasoning cache hit");
            return Ok(hit);
        }

        let response = self.inner.complete(prompt).await?;
        self.cache.set(&inputs, response.clone());
        Ok(response)
    }
}

/// Assembles the standard adapter stack: cache in front of retry in front
/// of the given backend.
pub fn layered<S: ReasoningService>(
    backend: S,
    policy: RetryPolicy,
    cache: Option<Arc<ResponseCache>>,
    namespace: &str,
) -> Arc<dyn ReasoningService> {
    let retrying = RetryingReasoner::new(backend, policy);
    match cache {
        Some(cache) => Arc::new(CachedReasoner::new(retrying, cache, namespace)),
        None => Arc::new(retrying),
    }
}
