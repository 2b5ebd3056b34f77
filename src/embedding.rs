//! Embedding provider implementations.
//!
//! - **[`DisabledEmbedder`]**: every call fails; used when embeddings are
//!   not configured. Answers are then produced without retrieval.
//! - **[`OpenAiEmbedder`]**: `POST {url}/v1/embeddings` (OpenAI or any
//!   compatible server), batched, with retry and backoff.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! Use [`create_embedder`] to pick one from the configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::{EmbeddingServiceError, ServiceFailure};

use crate::config::EmbeddingConfig;
use crate::http::{self, RetryPolicy};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// An embedding provider that always fails with [`ServiceFailure::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        Err(ServiceFailure::Disabled.into())
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "OpenAI")?;
        let base = config.url.as_deref().unwrap_or(OPENAI_URL);
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            endpoint: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    /// Override the retry policy (tests use millisecond backoff).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let reply = http::post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            &self.retry,
        )
        .await?;
        Ok(parse_openai_response(&reply)?)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ServiceFailure> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, to_vector(embedding)?));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "Ollama")?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_URL);
        Ok(Self {
            client: http::client(Duration::from_secs(config.timeout_secs))?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let reply =
            http::post_json(&self.client, &self.endpoint, None, &body, &self.retry).await?;
        Ok(parse_ollama_response(&reply)?)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, ServiceFailure> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("missing embeddings array"))?
        .iter()
        .map(to_vector)
        .collect()
}

// ============ Helpers ============

fn model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn to_vector(value: &Value) -> Result<Vec<f32>, ServiceFailure> {
    value
        .as_array()
        .ok_or_else(|| invalid("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| invalid("embedding contains a non-number"))
        })
        .collect()
}

fn invalid(what: &str) -> ServiceFailure {
    ServiceFailure::InvalidResponse(what.to_string())
}

/// Create the [`EmbeddingProvider`] selected by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
