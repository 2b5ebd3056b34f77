//! In-memory embedding index and its shared, versioned handle.
//!
//! [`EmbeddingIndex`] is a plain collection of embedded chunks searched by
//! brute-force cosine similarity. It is built either wholesale from a set
//! of documents ([`EmbeddingIndex::build`]) or one document at a time
//! ([`embed_document`] + [`EmbeddingIndex::merge`]).
//!
//! [`IndexHandle`] shares one index between concurrent requests. Readers
//! take an `Arc` to the current [`IndexSnapshot`] and keep using it for the
//! whole request; writers build a modified copy and swap it in with the
//! version bumped, so nobody ever observes a half-built index.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::chunk::{chunk_text, ChunkingParams};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{EmbeddingServiceError, ServiceFailure};
use crate::models::{Chunk, Document};
use crate::service::bounded;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    /// Content hash of the source document at the time it was embedded.
    pub document_hash: String,
    pub vector: Vec<f32>,
}

/// A search hit: chunk text, originating document and similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub text: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub score: f32,
}

/// How chunks are sent to the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Texts per embedding call.
    pub batch_size: usize,
    /// Deadline for each embedding call.
    pub timeout: Duration,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Chunk and embed a single document.
///
/// Fails on the first embedding error; a partial set of entries is never
/// returned. Empty documents produce no entries.
pub async fn embed_document(
    embedder: &dyn EmbeddingProvider,
    doc: &Document,
    chunking: &ChunkingParams,
    opts: &EmbedOptions,
) -> Result<Vec<IndexEntry>, EmbeddingServiceError> {
    let chunks = chunk_text(&doc.id, &doc.content, chunking);
    let document_hash = doc.content_hash();
    let mut entries = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(opts.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = bounded(opts.timeout, embedder.embed(&texts)).await?;
        if vectors.len() != texts.len() {
            return Err(ServiceFailure::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }
        entries.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    chunk,
                    document_hash: document_hash.clone(),
                    vector,
                }),
        );
    }

    Ok(entries)
}

/// A searchable collection of embedded chunks.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    entries: Vec<IndexEntry>,
    /// document id → content hash of the indexed version.
    documents: HashMap<String, String>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble an index from already-embedded entries (e.g. loaded from
    /// storage).
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut index = Self::new();
        index.insert_entries(entries);
        index
    }

    /// Chunk and embed every document, producing a fresh index.
    ///
    /// Any embedding failure aborts the build and propagates.
    pub async fn build(
        embedder: &dyn EmbeddingProvider,
        documents: &[Document],
        chunking: &ChunkingParams,
        opts: &EmbedOptions,
    ) -> Result<Self, EmbeddingServiceError> {
        let mut index = Self::new();
        for doc in documents {
            let entries = embed_document(embedder, doc, chunking, opts).await?;
            index.documents.insert(doc.id.clone(), doc.content_hash());
            index.entries.extend(entries);
        }
        Ok(index)
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// An empty index returns an empty result without calling the
    /// embedding service.
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingServiceError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceFailure::InvalidResponse("empty embedding response".into()))?;

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|e| ScoredChunk {
                text: e.chunk.text.clone(),
                document_id: e.chunk.document_id.clone(),
                chunk_index: e.chunk.chunk_index,
                score: cosine_similarity(&query_vec, &e.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Merge `other` into this index. Documents present in both are taken
    /// from `other`.
    pub fn merge(&mut self, other: EmbeddingIndex) {
        for doc_id in other.documents.keys() {
            self.remove_document(doc_id);
        }
        self.entries.extend(other.entries);
        self.documents.extend(other.documents);
    }

    /// Replace a single document's entries.
    pub fn insert_document(&mut self, document_id: &str, document_hash: &str, entries: Vec<IndexEntry>) {
        self.remove_document(document_id);
        self.documents
            .insert(document_id.to_string(), document_hash.to_string());
        self.entries.extend(entries);
    }

    /// Drop a document's entries. Returns whether it was indexed.
    pub fn remove_document(&mut self, document_id: &str) -> bool {
        self.entries.retain(|e| e.chunk.document_id != document_id);
        self.documents.remove(document_id).is_some()
    }

    /// Whether this exact version of a document is indexed.
    pub fn contains_document(&self, document_id: &str, content_hash: &str) -> bool {
        self.documents
            .get(document_id)
            .is_some_and(|h| h == content_hash)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of chunks held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn insert_entries(&mut self, entries: Vec<IndexEntry>) {
        for e in &entries {
            self.documents
                .insert(e.chunk.document_id.clone(), e.document_hash.clone());
        }
        self.entries.extend(entries);
    }
}

/// An immutable, versioned view of the shared index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub version: u64,
    pub index: EmbeddingIndex,
}

/// Result of [`IndexHandle::index_document`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexUpdate {
    /// This version of the document was already indexed.
    Unchanged,
    /// New entries were embedded and published in `version`.
    Indexed {
        version: u64,
        entries: Vec<IndexEntry>,
    },
}

/// Shared index with copy-on-rebuild semantics.
///
/// Writers are serialized through [`IndexHandle::writer`]; each write
/// clones the current index, applies the change, and publishes the copy as
/// a new snapshot. Embedding happens before the writer lock is taken, so a
/// slow embedding service never blocks other writers.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_index(index: EmbeddingIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot { version: 1, index })),
            writer: Mutex::new(()),
        }
    }

    /// The current snapshot. Stays valid even if a writer publishes a
    /// newer one while the caller is using it.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Exclusive write access until the returned guard is dropped.
    pub async fn writer(&self) -> IndexWriter<'_> {
        IndexWriter {
            handle: self,
            _guard: self.writer.lock().await,
        }
    }

    /// Embed `doc` and publish it, unless this version is already indexed.
    pub async fn index_document(
        &self,
        embedder: &dyn EmbeddingProvider,
        doc: &Document,
        chunking: &ChunkingParams,
        opts: &EmbedOptions,
    ) -> Result<IndexUpdate, EmbeddingServiceError> {
        let hash = doc.content_hash();
        if self.snapshot().index.contains_document(&doc.id, &hash) {
            return Ok(IndexUpdate::Unchanged);
        }

        let entries = embed_document(embedder, doc, chunking, opts).await?;

        let mut writer = self.writer().await;
        if writer.contains_document(&doc.id, &hash) {
            return Ok(IndexUpdate::Unchanged);
        }
        let version = writer.insert_document(&doc.id, &hash, entries.clone());
        Ok(IndexUpdate::Indexed { version, entries })
    }

    /// Remove a document. Returns the new version if anything changed.
    pub async fn remove_document(&self, document_id: &str) -> Option<u64> {
        self.writer().await.remove_document(document_id)
    }

    /// Replace the whole index.
    pub async fn replace(&self, index: EmbeddingIndex) -> u64 {
        self.writer().await.replace(index)
    }
}

/// Held writer lock on an [`IndexHandle`].
///
/// Checks made through the writer stay true until it is dropped, so a
/// caller can verify outside state (e.g. that a document still exists)
/// and publish without another writer slipping in between.
pub struct IndexWriter<'a> {
    handle: &'a IndexHandle,
    _guard: MutexGuard<'a, ()>,
}

impl IndexWriter<'_> {
    pub fn contains_document(&self, document_id: &str, content_hash: &str) -> bool {
        self.handle
            .snapshot()
            .index
            .contains_document(document_id, content_hash)
    }

    /// Publish `entries` as the indexed version of a document.
    pub fn insert_document(
        &mut self,
        document_id: &str,
        content_hash: &str,
        entries: Vec<IndexEntry>,
    ) -> u64 {
        self.publish(|index| index.insert_document(document_id, content_hash, entries))
    }

    pub fn remove_document(&mut self, document_id: &str) -> Option<u64> {
        if !self
            .handle
            .snapshot()
            .index
            .document_ids()
            .any(|id| id == document_id)
        {
            return None;
        }
        Some(self.publish(|index| {
            index.remove_document(document_id);
        }))
    }

    pub fn replace(&mut self, index: EmbeddingIndex) -> u64 {
        self.publish(move |current| *current = index)
    }

    /// Clone the current index, apply `change`, and swap the copy in.
    fn publish(&mut self, change: impl FnOnce(&mut EmbeddingIndex)) -> u64 {
        let current = self.handle.snapshot();
        let mut next = current.index.clone();
        change(&mut next);
        let version = current.version + 1;
        *self
            .handle
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(IndexSnapshot {
            version,
            index: next,
        });
        version
    }
}
