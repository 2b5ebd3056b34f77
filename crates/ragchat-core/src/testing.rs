//! Deterministic fakes for the model services.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingServiceError, GenerationServiceError, ServiceFailure};
use crate::generation::{GenerationProvider, GenerationRequest};

const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// [`DIMS`] buckets. Texts sharing words get similar vectors.
pub struct HashingEmbedder {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
        }
    }

    pub fn failing() -> Self {
        let e = Self::new();
        e.set_failing(true);
        e
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            // FNV-1a
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceFailure::Transport("connection refused".into()).into());
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}

type Script = dyn Fn(&GenerationRequest) -> Result<String, GenerationServiceError> + Send + Sync;

/// Generator driven by a closure; records every request it receives.
pub struct ScriptedGenerator {
    script: Box<Script>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&GenerationRequest) -> Result<String, GenerationServiceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers by echoing the prompt, so grounded answers contain the
    /// retrieved context.
    pub fn echo() -> Self {
        Self::new(|req| Ok(format!("echo: {}", req.prompt)))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(ServiceFailure::Api {
            status: 503,
            body: "overloaded".into(),
        }
        .into()))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted-test"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.script)(request)
    }
}
