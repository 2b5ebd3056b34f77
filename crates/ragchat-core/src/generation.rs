//! Generation (LLM) provider trait and request type.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GenerationServiceError;
use crate::models::{ChatTurn, Role};

/// Input to a single generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationRequest {
    /// Optional system instruction placed before the history.
    pub system: Option<String>,
    /// Prior conversation turns, oldest first.
    pub history: Vec<ChatTurn>,
    /// The final user turn.
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Flatten into the role-tagged message list chat APIs expect.
    pub fn to_turns(&self) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system {
            turns.push(ChatTurn::new(Role::System, system.clone()));
        }
        turns.extend(self.history.iter().cloned());
        turns.push(ChatTurn::new(Role::User, self.prompt.clone()));
        turns
    }
}

/// An external language model that answers a prompt given history.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationServiceError>;
}
