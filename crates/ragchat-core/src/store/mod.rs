//! Persistence port for documents, chats, messages and embedded chunks.
//!
//! The [`Store`] trait is everything the orchestrator needs from a
//! database. [`memory::InMemoryStore`] backs the unit tests; the app crate
//! provides a SQLite implementation.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::index::IndexEntry;
use crate::models::{Chat, Document, Message};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](Store::create_document) | Persist a new document |
/// | [`set_document_index_ref`](Store::set_document_index_ref) | Record where a document's entries live |
/// | [`delete_document`](Store::delete_document) | Delete a document and its persisted entries |
/// | [`create_chat`](Store::create_chat) | Persist a new chat |
/// | [`delete_chat`](Store::delete_chat) | Delete a chat and all its messages |
/// | [`create_message`](Store::create_message) | Append a message to a chat |
/// | [`list_messages`](Store::list_messages) | A chat's messages in creation order |
/// | [`delete_message`](Store::delete_message) | Remove one message (rollback) |
/// | [`save_index_entries`](Store::save_index_entries) | Persist a document's embedded chunks |
/// | [`load_index_entries`](Store::load_index_entries) | Load every persisted entry for a model |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents, oldest first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn set_document_index_ref(&self, id: &str, index_ref: Option<&str>) -> Result<()>;

    /// Delete a document together with its persisted index entries.
    /// Returns `false` if no such document existed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn create_chat(&self, chat: &Chat) -> Result<()>;

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>>;

    /// All chats, most recently active first.
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    async fn count_chats(&self) -> Result<usize> {
        Ok(self.list_chats().await?.len())
    }

    /// Delete a chat and cascade to its messages.
    async fn delete_chat(&self, id: &str) -> Result<bool>;

    /// Append a message and bump the owning chat's `updated_at`.
    /// Fails if the chat does not exist.
    async fn create_message(&self, message: &Message) -> Result<()>;

    /// Messages of a chat in creation order. Ties on `created_at` keep
    /// insertion order.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>>;

    async fn last_message(&self, chat_id: &str) -> Result<Option<Message>> {
        Ok(self.list_messages(chat_id).await?.pop())
    }

    async fn delete_message(&self, id: &str) -> Result<bool>;

    /// Replace the persisted entries of one document. Fails if the
    /// document does not exist.
    async fn save_index_entries(
        &self,
        document_id: &str,
        entries: &[IndexEntry],
        model: &str,
    ) -> Result<()>;

    /// Every persisted entry embedded with `model`, ordered by document
    /// then chunk index.
    async fn load_index_entries(&self, model: &str) -> Result<Vec<IndexEntry>>;

    async fn delete_index_entries(&self, document_id: &str) -> Result<()>;
}
