//! The chat orchestrator: ingestion, indexing and "answer this message".
//!
//! [`Orchestrator::send_message`] is the one operation with a consistency
//! contract. Lookups and validation run before anything is written, and if
//! no answer can be produced the user message is deleted again, so a caller
//! never observes a user turn without its assistant reply.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::ChunkingParams;
use crate::composer::{Answer, AnswerComposer, ComposeOutcome, ComposerSettings, Grounding};
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::evaluator::Evaluation;
use crate::generation::GenerationProvider;
use crate::index::{embed_document, EmbedOptions, EmbeddingIndex, IndexHandle, ScoredChunk};
use crate::memory::ConversationMemory;
use crate::models::{Chat, ChatTurn, Document, Message};
use crate::store::Store;

/// Where the index used for answering comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Index each document once at ingestion and share one snapshot.
    #[default]
    Incremental,
    /// Rebuild a private index from every stored document per request.
    Rebuild,
}

/// Default for [`OrchestratorSettings::answer_sync_timeout`].
pub const DEFAULT_ANSWER_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub index_mode: IndexMode,
    pub chunking: ChunkingParams,
    pub embed: EmbedOptions,
    pub memory: ConversationMemory,
    pub composer: ComposerSettings,
    /// How long an answer waits for the index to catch up with the store
    /// before it proceeds with the current snapshot.
    pub answer_sync_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            index_mode: IndexMode::default(),
            chunking: ChunkingParams::default(),
            embed: EmbedOptions::default(),
            memory: ConversationMemory::default(),
            composer: ComposerSettings::default(),
            answer_sync_timeout: DEFAULT_ANSWER_SYNC_TIMEOUT,
        }
    }
}

/// Everything a client needs after a successful `send_message`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
    /// Texts of the chunks the answer was grounded on, most relevant first.
    pub sources: Vec<String>,
    /// The same chunks with their document, position and score.
    pub source_chunks: Vec<ScoredChunk>,
    pub grounding: Grounding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

/// Counts from one [`Orchestrator::sync_index`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub indexed: usize,
    pub removed: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: IndexHandle,
    composer: AnswerComposer,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        let composer = AnswerComposer::new(embedder.clone(), generator, settings.composer);
        Self {
            store,
            embedder,
            index: IndexHandle::new(),
            composer,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn index_mode(&self) -> IndexMode {
        self.settings.index_mode
    }

    // ============ Chats ============

    /// Create a chat. A missing or blank title becomes `"New Chat {n}"`.
    pub async fn create_chat(&self, title: Option<&str>) -> Result<Chat, RagError> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => Chat::default_title(self.store.count_chats().await?),
        };
        let chat = Chat::new(title);
        self.store.create_chat(&chat).await?;
        info!(chat_id = %chat.id, title = %chat.title, "created chat");
        Ok(chat)
    }

    /// A chat and its messages in creation order.
    pub async fn chat_with_messages(&self, chat_id: &str) -> Result<(Chat, Vec<Message>), RagError> {
        let chat = self.require_chat(chat_id).await?;
        let messages = self.store.list_messages(&chat.id).await?;
        Ok((chat, messages))
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), RagError> {
        if !self.store.delete_chat(chat_id).await? {
            return Err(RagError::not_found("chat", chat_id));
        }
        info!(chat_id, "deleted chat");
        Ok(())
    }

    // ============ Documents ============

    /// Store a document and, in incremental mode, index it.
    ///
    /// If embedding fails the error is returned but the document stays
    /// stored without an `index_ref`; the next [`sync_index`](Self::sync_index)
    /// retries it.
    pub async fn ingest_document(&self, title: &str, content: &str) -> Result<Document, RagError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RagError::Validation("title must not be empty".into()));
        }
        if content.trim().is_empty() {
            return Err(RagError::Validation("content must not be empty".into()));
        }

        let mut doc = Document::new(title, content);
        self.store.create_document(&doc).await?;
        info!(
            document_id = %doc.id,
            title = %doc.title,
            chars = doc.content.chars().count(),
            "stored document"
        );

        if self.settings.index_mode == IndexMode::Incremental {
            self.index_stored(&mut doc).await?;
        }
        Ok(doc)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, RagError> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| RagError::not_found("document", id))
    }

    /// Delete a document and drop its entries from the index.
    ///
    /// The store row goes first; a concurrent [`sync_index`](Self::sync_index)
    /// re-checks the store under the index writer lock, so it cannot
    /// publish the document again afterwards.
    pub async fn delete_document(&self, id: &str) -> Result<(), RagError> {
        if !self.store.delete_document(id).await? {
            return Err(RagError::not_found("document", id));
        }
        let version = self.index.remove_document(id).await;
        info!(document_id = id, index_version = ?version, "deleted document");
        Ok(())
    }

    // ============ Index ============

    /// Restore the shared index from vectors persisted for the current
    /// embedding model. Returns the number of documents loaded.
    pub async fn load_persisted(&self) -> Result<usize, RagError> {
        let entries = self
            .store
            .load_index_entries(self.embedder.model_name())
            .await?;
        let index = EmbeddingIndex::from_entries(entries);
        let (documents, chunks) = (index.document_count(), index.len());
        let version = self.index.replace(index).await;
        info!(documents, chunks, version, "loaded persisted index");
        Ok(documents)
    }

    /// Bring the shared index in line with the store: index stored
    /// documents it lacks and drop documents that no longer exist.
    ///
    /// A document that fails to embed is logged and counted in
    /// [`SyncReport::failed`]; store errors abort the pass.
    pub async fn sync_index(&self) -> Result<SyncReport, RagError> {
        // Snapshot before listing: anything in the snapshot but not in the
        // listing was deleted, not merely created after the listing.
        let snapshot = self.index.snapshot();
        let docs = self.store.list_documents().await?;
        let mut report = SyncReport::default();

        let stored: HashSet<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        let stale: Vec<String> = snapshot
            .index
            .document_ids()
            .filter(|id| !stored.contains(id))
            .map(str::to_string)
            .collect();
        for id in stale {
            if self.index.remove_document(&id).await.is_some() {
                report.removed += 1;
            }
        }

        for mut doc in docs {
            if snapshot.index.contains_document(&doc.id, &doc.content_hash()) {
                continue;
            }
            match self.index_stored(&mut doc).await {
                Ok(true) => report.indexed += 1,
                Ok(false) => {}
                Err(RagError::Embedding(e)) => {
                    warn!(document_id = %doc.id, error = %e, "could not index document");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report != SyncReport::default() {
            info!(
                indexed = report.indexed,
                removed = report.removed,
                failed = report.failed,
                version = self.index.version(),
                "synchronized index"
            );
        }
        Ok(report)
    }

    /// Index a stored document, persist its entries and record its
    /// `index_ref`. Returns `false` if it was already indexed or has been
    /// deleted in the meantime.
    ///
    /// Embedding runs without the index writer lock. Under the lock the
    /// document is looked up again, so one deleted while it was being
    /// embedded is never persisted or published.
    async fn index_stored(&self, doc: &mut Document) -> Result<bool, RagError> {
        let hash = doc.content_hash();
        if self.index.snapshot().index.contains_document(&doc.id, &hash) {
            return Ok(false);
        }

        let entries = embed_document(
            self.embedder.as_ref(),
            doc,
            &self.settings.chunking,
            &self.settings.embed,
        )
        .await?;

        let mut writer = self.index.writer().await;
        if writer.contains_document(&doc.id, &hash) {
            return Ok(false);
        }
        if self.store.get_document(&doc.id).await?.is_none() {
            debug!(document_id = %doc.id, "document deleted while indexing, dropping entries");
            return Ok(false);
        }

        let model = self.embedder.model_name();
        self.store.save_index_entries(&doc.id, &entries, model).await?;
        let index_ref = format!("{}:{}", model, hash);
        self.store
            .set_document_index_ref(&doc.id, Some(&index_ref))
            .await?;
        let chunks = entries.len();
        let version = writer.insert_document(&doc.id, &hash, entries);
        drop(writer);
        doc.index_ref = Some(index_ref);

        info!(
            document_id = %doc.id,
            chunks,
            version,
            "indexed document"
        );
        Ok(true)
    }

    // ============ Messages ============

    /// Answer `text` in the chat `chat_id`.
    ///
    /// On success exactly two messages are added to the chat. On any error
    /// the chat is left as it was.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<SendMessageOutcome, RagError> {
        let chat = self.require_chat(chat_id).await?;
        if text.trim().is_empty() {
            return Err(RagError::Validation("message must not be empty".into()));
        }

        let history = self
            .settings
            .memory
            .history(&self.store.list_messages(&chat.id).await?);

        let user_message = Message::user(&chat.id, text);
        self.store.create_message(&user_message).await?;

        match self.answer(&chat, text, &history).await {
            Ok((assistant_message, answer, grounding)) => {
                info!(
                    chat_id = %chat.id,
                    grounding = ?grounding,
                    sources = answer.sources.len(),
                    "answered message"
                );
                Ok(SendMessageOutcome {
                    user_message,
                    assistant_message,
                    sources: answer.source_texts(),
                    source_chunks: answer.sources,
                    grounding,
                    evaluation: answer.evaluation,
                })
            }
            Err(e) => {
                warn!(chat_id = %chat.id, error = %e, "answer failed, removing user message");
                if let Err(rollback) = self.store.delete_message(&user_message.id).await {
                    warn!(message_id = %user_message.id, error = %rollback, "could not remove user message");
                }
                Err(e)
            }
        }
    }

    /// Everything after the user message is stored: compose and persist
    /// the reply.
    async fn answer(
        &self,
        chat: &Chat,
        text: &str,
        history: &[ChatTurn],
    ) -> Result<(Message, Answer, Grounding), RagError> {
        let outcome = match self.settings.index_mode {
            IndexMode::Incremental => {
                self.catch_up_index().await;
                let snapshot = self.index.snapshot();
                self.composer.compose(text, history, Some(&snapshot.index)).await
            }
            IndexMode::Rebuild => match self.rebuild_index().await {
                Ok(index) => self.composer.compose(text, history, Some(&index)).await,
                Err(e) => {
                    warn!(error = %e, "index rebuild failed, answering without context");
                    match self.composer.compose(text, history, None).await {
                        ComposeOutcome::Ungrounded(answer) => ComposeOutcome::Degraded {
                            answer,
                            cause: format!("index rebuild failed: {e}"),
                        },
                        other => other,
                    }
                }
            },
        };

        let (answer, grounding) = outcome.into_result()?;
        let assistant_message = Message::assistant(&chat.id, answer.text.clone());
        self.store.create_message(&assistant_message).await?;
        Ok((assistant_message, answer, grounding))
    }

    /// Give the shared index a bounded chance to pick up documents whose
    /// indexing failed earlier. Never fails: on error or timeout the
    /// answer uses whatever snapshot is current.
    async fn catch_up_index(&self) {
        let limit = self.settings.answer_sync_timeout;
        match tokio::time::timeout(limit, self.sync_index()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "index sync failed, answering from current snapshot"),
            Err(_) => warn!(
                timeout = ?limit,
                "index sync still running, answering from current snapshot"
            ),
        }
    }

    /// A request-scoped index over every stored document.
    async fn rebuild_index(&self) -> Result<EmbeddingIndex, RagError> {
        let docs = self.store.list_documents().await?;
        let index = EmbeddingIndex::build(
            self.embedder.as_ref(),
            &docs,
            &self.settings.chunking,
            &self.settings.embed,
        )
        .await?;
        Ok(index)
    }

    async fn require_chat(&self, chat_id: &str) -> Result<Chat, RagError> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| RagError::not_found("chat", chat_id))
    }
}
