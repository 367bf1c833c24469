//! Chat completions client implementing `SummaryGenerator`.

use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ghsum_core::config::LlmConfig;
use ghsum_core::domain::{ActivityPayload, ConfigError, GenerateError};
use ghsum_core::{RetryPolicy, SummaryGenerator};

use crate::prompt::{build_messages, ChatMessage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct ChatSummarizerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub language: Option<String>,
    pub timezone: Tz,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ChatSummarizerConfig {
    /// From the `[llm]` section. The api key must already be resolved.
    pub fn from_config(config: &LlmConfig, timezone: Tz) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("OPENAI_API_KEY"))?;
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: config.model_name.clone(),
            system_prompt: config.system_prompt.clone(),
            language: config.language.clone(),
            timezone,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::with_retries(
                config.retries,
                Duration::from_secs(config.retry_delay_secs),
            ),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// One failed call, before retry classification.
#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl CallError {
    fn is_transient(&self) -> bool {
        match self {
            CallError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            CallError::Transport(_) | CallError::Timeout => true,
            CallError::Decode(_) => false,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatSummarizer {
    config: ChatSummarizerConfig,
    http: reqwest::Client,
}

impl ChatSummarizer {
    pub fn new(config: ChatSummarizerConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: "llm",
                reason: e.to_string(),
            })?;
        Ok(Self { config, http })
    }

    pub fn from_config(config: &LlmConfig, timezone: Tz) -> Result<Self, ConfigError> {
        Self::new(ChatSummarizerConfig::from_config(config, timezone)?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete_once(&self, request: &ChatRequest<'_>) -> Result<String, CallError> {
        let response = self
            .http
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout
                } else {
                    CallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CallError::Decode("completion has no content".to_string()))
    }
}

#[async_trait]
impl SummaryGenerator for ChatSummarizer {
    async fn summarize(&self, payload: &ActivityPayload) -> Result<String, GenerateError> {
        let messages = build_messages(
            &self.config.system_prompt,
            self.config.language.as_deref(),
            self.config.timezone,
            payload,
        )?;
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
        };
        debug!(model = %self.config.model, items = payload.counts().total(), "requesting summary");

        let summary = self
            .config
            .retry
            .run(
                "llm.chat",
                || self.complete_once(&request),
                CallError::is_transient,
            )
            .await
            .map_err(|e| match e {
                CallError::Timeout => GenerateError::Timeout(self.config.timeout),
                other => GenerateError::Provider(other.to_string()),
            })?;

        info!(repo = %payload.repo, chars = summary.len(), "summary generated");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_a_config_error() {
        assert!(matches!(
            ChatSummarizerConfig::from_config(&LlmConfig::default(), chrono_tz::UTC),
            Err(ConfigError::MissingCredential("OPENAI_API_KEY"))
        ));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let mut llm = LlmConfig::default();
        llm.api_key = Some("k".into());
        llm.base_url = Some("http://localhost:8080/v1/".into());
        let config = ChatSummarizerConfig::from_config(&llm, chrono_tz::UTC).unwrap();
        assert_eq!(config.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn transient_classification() {
        let status = |status| CallError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(CallError::Timeout.is_transient());
        assert!(!CallError::Decode("x".into()).is_transient());
    }
}
