//! Gemini API client
//!
//! Implements `TextGenerator` over the `generateContent` endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::GovernanceError;
use crate::generation::{GenerationRequest, GenerationResponse, TextGenerator};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{}:generateContent", BASE_URL, model),
        })
    }

    pub fn from_config(config: &EngineConfig) -> crate::Result<Self> {
        Self::new(
            config.gemini_api_key.clone(),
            &config.gemini_model,
            config.generation_timeout,
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> crate::Result<GenerationResponse> {
        if self.api_key.is_empty() {
            return Err(GovernanceError::generation(
                "GEMINI_API_KEY not configured",
                false,
            ));
        }

        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.user_message,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: request.max_tokens,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system_prompt,
                }],
            },
        };

        debug!(endpoint = %self.endpoint, max_tokens = request.max_tokens, "Calling Gemini API");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                GovernanceError::generation(
                    format!("Gemini API error: {}", e),
                    e.is_timeout() || e.is_connect(),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(GovernanceError::generation(
                format!("Gemini API error ({}): {}", status, error_text),
                is_retryable_status(status),
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            GovernanceError::generation(format!("Gemini parse error: {}", e), false)
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| GovernanceError::generation("Empty response from Gemini", false))?;

        let tokens_used = gemini_response
            .usage_metadata
            .map(|u| u.total_token_count.unwrap_or(u.prompt_token_count + u.candidates_token_count))
            .unwrap_or(0);

        info!(tokens_used, "Gemini response received");

        Ok(GenerationResponse { text, tokens_used })
    }
}

/// Rate limiting and server-side failures are worth another attempt.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    total_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Is this answer concrete?".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 256,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You evaluate answers".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Is this answer concrete?"));
        assert!(json.contains("\"maxOutputTokens\":256"));
        assert!(json.contains("systemInstruction"));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "hello"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "hello");
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, Some(15));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash", Duration::from_secs(1)).unwrap();
        let err = client
            .generate(GenerationRequest::new("sys", "user", 16))
            .await
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("api_key"));
        assert!(!err.is_retryable());
    }
}
