//! HTTP judge backend.

use crate::{JudgeBackend, VerdictRequest};
use async_trait::async_trait;
use conclave_core::BackendError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Judge backend over an Anthropic-style messages API.
pub struct HttpJudgeBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl HttpJudgeBackend {
    /// Create a new backend client.
    ///
    /// # Arguments
    /// * `api_key` - API key for the provider
    /// * `model` - Model identifier to request verdicts from
    /// * `request_timeout` - End-to-end timeout per verdict call
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            max_tokens: 512,
        }
    }

    /// Override the base URL (testing, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl JudgeBackend for HttpJudgeBackend {
    async fn render_verdict(&self, request: &VerdictRequest) -> Result<String, BackendError> {
        let prompt = request.render_prompt();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable {
                provider: self.provider_id().to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed: MessagesResponse =
                response.json().await.map_err(|e| BackendError::InvalidResponse {
                    provider: self.provider_id().to_string(),
                    reason: format!("failed to parse response: {}", e),
                })?;
            let text = parsed
                .content
                .iter()
                .filter(|block| block.block_type == "text")
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                return Err(BackendError::InvalidResponse {
                    provider: self.provider_id().to_string(),
                    reason: "no text content in reply".to_string(),
                });
            }
            Ok(text)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };
            Err(BackendError::RequestFailed {
                provider: self.provider_id().to_string(),
                status: status.as_u16() as i32,
                message: if status == StatusCode::TOO_MANY_REQUESTS {
                    format!("rate limited: {}", message)
                } else {
                    message
                },
            })
        }
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }
}

impl std::fmt::Debug for HttpJudgeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJudgeBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = HttpJudgeBackend::new(
            "sk-secret",
            "claude-sonnet-4-5",
            Duration::from_secs(30),
        );
        let debug = format!("{:?}", backend);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }
}
