//! Generation (chat completion) provider implementations.
//!
//! - **[`DisabledGenerator`]**: every call fails. With generation disabled
//!   no message can be answered, so `send_message` always rolls back.
//! - **[`OpenAiGenerator`]**: `POST {url}/v1/chat/completions`.
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` with streaming off.
//!
//! Both HTTP providers share the retry strategy in [`crate::http`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use ragchat_core::generation::{GenerationProvider, GenerationRequest};
use ragchat_core::{GenerationServiceError, ServiceFailure};

use crate::config::GenerationConfig;
use crate::http::{self, RetryPolicy};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// `[{role, content}, ...]`, the message list shape both APIs accept.
fn wire_messages(request: &GenerationRequest) -> Vec<Value> {
    request
        .to_turns()
        .iter()
        .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
        .collect()
}

// ============ Disabled Provider ============

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationServiceError> {
        Err(ServiceFailure::Disabled.into())
    }
}

// ============ OpenAI Provider ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = require_model(config, "OpenAI")?;
        let base = config.url.as_deref().unwrap_or(OPENAI_URL);
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            endpoint: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(request),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationServiceError> {
        let reply = http::post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &self.body(request),
            &self.retry,
        )
        .await?;
        let text = reply
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ServiceFailure::InvalidResponse("missing choices[0].message.content".into()))?;
        Ok(text.trim().to_string())
    }
}

// ============ Ollama Provider ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = require_model(config, "Ollama")?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_URL);
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let mut options = json!({ "temperature": self.temperature });
        if let Some(max_tokens) = self.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        json!({
            "model": self.model,
            "messages": wire_messages(request),
            "stream": false,
            "options": options,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationServiceError> {
        let reply =
            http::post_json(&self.client, &self.endpoint, None, &self.body(request), &self.retry)
                .await?;
        let text = reply
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ServiceFailure::InvalidResponse("missing message.content".into()))?;
        Ok(text.trim().to_string())
    }
}

fn require_model(config: &GenerationConfig, provider: &str) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("generation.model required for {} provider", provider))
}

/// Create the [`GenerationProvider`] selected by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
