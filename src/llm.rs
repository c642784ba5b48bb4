//! Language-model collaborator contract and the OpenAI-compatible client.
//!
//! The orchestrator only ever talks to `CompletionProvider`; the concrete
//! client handles transport concerns (timeouts, transient-failure retry)
//! so the repair loop never has to.

use crate::config::Settings;
use crate::error::{Result, SqlGateError};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// How the model is asked to respond: a JSON object conforming to the
/// structured query schema, or free T-SQL text (used for repairs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    Structured,
    Freeform,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Completion collaborator. Implementations must distinguish transport and
/// timeout failures from "the model answered but the content was empty"
/// (`SqlGateError::EmptyCompletion`) so the orchestrator can map each to its
/// own terminal result.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], mode: CompletionMode) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: settings.openai_api_key.clone(),
            base_url: settings.openai_base_url.clone(),
            model: settings.openai_model.clone(),
            temperature: settings.openai_temperature,
            max_tokens: settings.openai_max_tokens,
            request_timeout: settings.openai_request_timeout,
            max_retries: settings.openai_max_retries,
        }
    }

    /// Timeouts, connection failures, 429 and 5xx are transient; everything
    /// else (auth failures, malformed requests, empty content) is not.
    fn is_retryable(err: &SqlGateError) -> bool {
        matches!(err, SqlGateError::Timeout | SqlGateError::Transport(_))
    }

    async fn request_once(&self, messages: &[ChatMessage], mode: CompletionMode) -> Result<String> {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if mode == CompletionMode::Structured {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SqlGateError::Timeout
                } else {
                    SqlGateError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(SqlGateError::Transport(format!(
                    "LLM API error ({}): {}",
                    status, error_text
                )));
            }
            return Err(SqlGateError::Api(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            SqlGateError::Api(format!("failed to decode LLM response: {}", e))
        })?;

        if let Some(err) = response_json.get("error") {
            return Err(SqlGateError::Api(err.to_string()));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| SqlGateError::Api("no choices in LLM response".to_string()))?;

        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            if reason == "length" {
                warn!("LLM response truncated by token limit");
            } else if reason == "content_filter" {
                return Err(SqlGateError::Api(
                    "LLM response was filtered by content policy".to_string(),
                ));
            }
        }

        let content = choice["message"]["content"].as_str().unwrap_or("");
        if content.trim().is_empty() {
            return Err(SqlGateError::EmptyCompletion);
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage], mode: CompletionMode) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            match self.request_once(messages, mode).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    if !Self::is_retryable(&err) {
                        return Err(err);
                    }
                    if attempt < self.max_retries {
                        // Exponential backoff with jitter: 1s, 2s, 4s, ...
                        let base_secs = 2_u64.pow(attempt);
                        let jitter_ms = rand::thread_rng().gen_range(0..=base_secs * 500);
                        let delay =
                            Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms);
                        warn!(
                            "LLM request failed (attempt {}/{}): {}. Retrying in {:.2}s",
                            attempt + 1,
                            self.max_retries + 1,
                            err,
                            delay.as_secs_f64()
                        );
                        sleep(delay).await;
                    } else {
                        error!(
                            "LLM request failed after {} attempts: {}",
                            self.max_retries + 1,
                            err
                        );
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| SqlGateError::Transport("all retry attempts failed".to_string())))
    }
}
