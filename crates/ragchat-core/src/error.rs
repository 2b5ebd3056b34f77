//! Error taxonomy for the RAG core.
//!
//! | Error | Raised by | Client-facing meaning |
//! |-------|-----------|-----------------------|
//! | [`EmbeddingServiceError`] | embedding calls | 500, retryable by caller |
//! | [`GenerationServiceError`] | generation calls | 500, retryable by caller |
//! | [`RagError::NotFound`] | orchestrator lookups | 404 |
//! | [`RagError::Validation`] | orchestrator input checks | 400 |
//! | [`RagError::Store`] | the persistence port | 500 |

use std::time::Duration;

use thiserror::Error;

/// Why a call to an external model service failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider is disabled")]
    Disabled,
}

impl ServiceFailure {
    /// Transient failures worth retrying: timeouts, network errors,
    /// rate limiting (429) and server errors (5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceFailure::Timeout(_) | ServiceFailure::Transport(_) => true,
            ServiceFailure::Api { status, .. } => *status == 429 || *status >= 500,
            ServiceFailure::InvalidResponse(_) | ServiceFailure::Disabled => false,
        }
    }
}

/// The embedding service could not produce vectors.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("embedding service error: {0}")]
pub struct EmbeddingServiceError(#[from] pub ServiceFailure);

/// The generation service could not produce an answer.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("generation service error: {0}")]
pub struct GenerationServiceError(#[from] pub ServiceFailure);

/// Errors surfaced by the orchestrator to its callers.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingServiceError),
    #[error(transparent)]
    Generation(#[from] GenerationServiceError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RagError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RagError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the caller caused the error (bad input or missing entity).
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::NotFound { .. } | RagError::Validation(_))
    }
}
