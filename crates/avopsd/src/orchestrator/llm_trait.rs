//! Model Invoker Trait Abstraction
//!
//! The engine only needs "send a system prompt and a user payload, get text
//! back". Keeping that behind a trait lets orchestration tests run without an
//! Ollama instance.
//!
//! ## Usage
//!
//! Production code uses `OllamaClient` (see `llm_client.rs`).
//! Test code uses `FakeModelInvoker` with queued responses.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Why a model call produced no usable text.
///
/// None of these reach the caller of a run; every variant triggers the
/// rule-based fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model endpoint unreachable: {0}")]
    Http(String),

    #[error("Model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed model response: {0}")]
    Protocol(String),

    #[error("Model call cancelled")]
    Cancelled,
}

// ============================================================================
// Model Invoker Trait
// ============================================================================

/// Chat-style model backend
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send one system + user message pair, return the trimmed reply text
    async fn invoke(&self, system_prompt: &str, user_payload: &str) -> Result<String, ModelError>;

    /// Model identifier, for logs
    fn model_name(&self) -> &str;
}

// ============================================================================
// Fake Model Invoker (Testing)
// ============================================================================

/// One prompt pair seen by the fake
#[derive(Debug, Clone)]
pub struct RecordedPrompt {
    pub system_prompt: String,
    pub user_payload: String,
}

/// Fake model for deterministic testing
///
/// Replies come from a queue; once it drains every call gets the default
/// reply.
///
/// ## Example
///
/// ```rust,ignore
/// let fake = FakeModelInvokerBuilder::new()
///     .reply(r#"{"diagnosis":["x"],"next_steps":["y"]}"#)
///     .build();
/// ```
pub struct FakeModelInvoker {
    queue: Mutex<VecDeque<Result<String, ModelError>>>,
    default_reply: Result<String, ModelError>,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<RecordedPrompt>>>,
}

impl FakeModelInvoker {
    /// Always answer with `text`
    pub fn always(text: &str) -> Self {
        FakeModelInvokerBuilder::new().default_reply(Ok(text.to_string())).build()
    }

    /// Always fail with `error`
    pub fn failing(error: ModelError) -> Self {
        FakeModelInvokerBuilder::new().default_reply(Err(error)).build()
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Every prompt pair received, in order
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelInvoker for FakeModelInvoker {
    async fn invoke(&self, system_prompt: &str, user_payload: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(RecordedPrompt {
            system_prompt: system_prompt.to_string(),
            user_payload: user_payload.to_string(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.default_reply.clone())
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}

// ============================================================================
// Builder for FakeModelInvoker
// ============================================================================

pub struct FakeModelInvokerBuilder {
    queue: VecDeque<Result<String, ModelError>>,
    default_reply: Result<String, ModelError>,
    delay: Option<Duration>,
}

impl FakeModelInvokerBuilder {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            default_reply: Err(ModelError::Http("fake model has no reply".to_string())),
            delay: None,
        }
    }

    /// Queue a successful reply
    pub fn reply(mut self, text: &str) -> Self {
        self.queue.push_back(Ok(text.to_string()));
        self
    }

    /// Queue a failure
    pub fn error(mut self, error: ModelError) -> Self {
        self.queue.push_back(Err(error));
        self
    }

    /// Reply used once the queue is empty
    pub fn default_reply(mut self, reply: Result<String, ModelError>) -> Self {
        self.default_reply = reply;
        self
    }

    /// Sleep this long before every reply
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> FakeModelInvoker {
        FakeModelInvoker {
            queue: Mutex::new(self.queue),
            default_reply: self.default_reply,
            delay: self.delay,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for FakeModelInvokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
