//! Text-generation collaborator contract
//!
//! The engine only ever sees `TextGenerator`. Prompts are opaque strings;
//! any retry policy lives in `RetryingGenerator`, so flow code never loops.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::GovernanceError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        (**self).generate(request).await
    }
}

/// Bounded exponential backoff for retryable generation failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for RetryingGenerator<G> {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.inner.generate(request.clone()).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(attempt, "Generation succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable generation failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(GovernanceError::RetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Locate the JSON payload in a model reply: strips ``` fences and any
/// prose around the first object or array.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = cleaned.find(|c: char| c == '{' || c == '[')?;
    let closing = if cleaned[start..].starts_with('{') { '}' } else { ']' };
    let end = cleaned.rfind(closing)?;

    if end < start {
        return None;
    }
    Some(&cleaned[start..=end])
}

/// Parse a model reply into `T` after fence stripping.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let block = extract_json_block(text).ok_or_else(|| {
        GovernanceError::generation(format!("No JSON found in reply: {}", text), false)
    })?;
    serde_json::from_str(block)
        .map_err(|e| GovernanceError::generation(format!("Malformed JSON reply: {}", e), false))
}
