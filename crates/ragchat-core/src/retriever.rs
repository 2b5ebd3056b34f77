//! Top-K retrieval over an [`EmbeddingIndex`].

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::EmbeddingServiceError;
use crate::index::{EmbeddingIndex, ScoredChunk};
use crate::service::bounded;

/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Retrieved chunks packaged for the answer composer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk texts, most relevant first, for source attribution.
    pub fn sources(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }

    /// Chunk texts joined into a single block for the prompt.
    pub fn context_block(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Fetches the `k` most relevant chunks for a query.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    k: usize,
    timeout: Duration,
}

impl Retriever {
    pub fn new(k: usize, timeout: Duration) -> Self {
        Self { k, timeout }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub async fn retrieve(
        &self,
        index: &EmbeddingIndex,
        embedder: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<RetrievedContext, EmbeddingServiceError> {
        let chunks = bounded(self.timeout, index.search(embedder, query, self.k)).await?;
        debug!(
            k = self.k,
            hits = chunks.len(),
            top_score = chunks.first().map(|c| c.score),
            "retrieved context"
        );
        Ok(RetrievedContext { chunks })
    }
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkingParams;
    use crate::error::ServiceFailure;
    use crate::index::EmbedOptions;
    use crate::models::Document;
    use crate::testing::HashingEmbedder;

    async fn index_of(texts: &[&str], embedder: &HashingEmbedder) -> EmbeddingIndex {
        let docs: Vec<Document> = texts.iter().map(|t| Document::new("t", *t)).collect();
        EmbeddingIndex::build(
            embedder,
            &docs,
            &ChunkingParams::default(),
            &EmbedOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_defaults_to_four() {
        let embedder = HashingEmbedder::new();
        let texts = ["a b", "b c", "c d", "d e", "e f", "f g"];
        let index = index_of(&texts, &embedder).await;
        let ctx = Retriever::default()
            .retrieve(&index, &embedder, "b c d")
            .await
            .unwrap();
        assert_eq!(ctx.chunks.len(), DEFAULT_TOP_K);
    }

    #[tokio::test]
    async fn test_context_packaging() {
        let embedder = HashingEmbedder::new();
        let index = index_of(&["The sky is blue.", "Grass is green."], &embedder).await;
        let ctx = Retriever::new(2, Duration::from_secs(1))
            .retrieve(&index, &embedder, "sky")
            .await
            .unwrap();
        assert_eq!(ctx.sources()[0], "The sky is blue.");
        assert_eq!(ctx.context_block(), "The sky is blue.\n\nGrass is green.");
    }

    #[tokio::test]
    async fn test_retrieve_times_out() {
        let embedder = HashingEmbedder::new();
        let index = index_of(&["The sky is blue."], &embedder).await;
        let slow = HashingEmbedder::new().with_delay(Duration::from_secs(5));
        let err = Retriever::new(4, Duration::from_millis(20))
            .retrieve(&index, &slow, "sky")
            .await
            .unwrap_err();
        assert_eq!(err.0, ServiceFailure::Timeout(Duration::from_millis(20)));
    }
}
