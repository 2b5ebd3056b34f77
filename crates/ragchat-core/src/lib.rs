//! # ragchat core
//!
//! Retrieval-augmented answering for chat transcripts: data models,
//! chunking, the embedding index, retrieval, answer composition and the
//! "send message" orchestration, all expressed against two kinds of
//! collaborators:
//!
//! - **Model services**: [`embedding::EmbeddingProvider`] and
//!   [`generation::GenerationProvider`], opaque and fallible.
//! - **Persistence**: the [`store::Store`] port, with an in-memory
//!   implementation for tests.
//!
//! This crate performs no network or database I/O of its own. Concrete
//! providers and the SQLite store live in the `ragchat` app crate.
//!
//! ```text
//! document ──▶ chunk ──▶ embed ──▶ IndexHandle (versioned snapshot)
//!                                        │
//! message ──▶ Orchestrator ──▶ Composer ─┤─▶ Retriever ──▶ EmbeddingIndex
//!                  │               │
//!                  ▼               ▼
//!               Store        GenerationProvider
//! ```

pub mod chunk;
pub mod composer;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod generation;
pub mod index;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EmbeddingServiceError, GenerationServiceError, RagError, ServiceFailure};
