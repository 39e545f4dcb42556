//! Ollama LLM Client
//!
//! Non-streaming `/api/chat` calls with a low sampling temperature. Any
//! failure maps to a `ModelError`; the engine turns all of them into the
//! rule-based fallback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::llm_trait::{ModelError, ModelInvoker};
use crate::config::LlmConfig;

/// Ollama chat request
#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
}

/// Ollama chat message
#[derive(Debug, Clone, Serialize)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
}

/// Ollama client bound to one model
pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is reachable
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn build_request(&self, system_prompt: &str, user_payload: &str) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: user_payload.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout(self.timeout_secs)
        } else {
            ModelError::Http(err.to_string())
        }
    }
}

/// Pull `message.content` out of an `/api/chat` reply
fn message_content(body: &Value) -> Result<String, ModelError> {
    body.get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ModelError::Protocol("missing message.content".to_string()))
}

#[async_trait]
impl ModelInvoker for OllamaClient {
    async fn invoke(&self, system_prompt: &str, user_payload: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = self.build_request(system_prompt, user_payload);

        info!("Calling model {} ({} chars payload)", self.model, user_payload.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Ollama returned {}: {}", status, body);
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.timeout_secs)
                } else {
                    ModelError::Protocol(e.to_string())
                }
            })?;

        let content = message_content(&body)?;
        debug!("Model replied with {} chars", content.len());
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
