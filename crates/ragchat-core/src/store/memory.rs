//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Messages and index
//! entries live in insertion-ordered vectors so ordering matches a
//! database sorted by an autoincrement key.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::index::IndexEntry;
use crate::models::{Chat, Document, Message};

use super::Store;

struct StoredEntry {
    model: String,
    entry: IndexEntry,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<Vec<Document>>,
    chats: RwLock<HashMap<String, Chat>>,
    messages: RwLock<Vec<Message>>,
    entries: RwLock<Vec<StoredEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        let mut docs = write(&self.docs)?;
        if docs.iter().any(|d| d.id == doc.id) {
            bail!("document {} already exists", doc.id);
        }
        docs.push(doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(read(&self.docs)?.iter().find(|d| d.id == id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs = read(&self.docs)?.clone();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn set_document_index_ref(&self, id: &str, index_ref: Option<&str>) -> Result<()> {
        let mut docs = write(&self.docs)?;
        let doc = docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document {} not found", id))?;
        doc.index_ref = index_ref.map(str::to_string);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut docs = write(&self.docs)?;
            let before = docs.len();
            docs.retain(|d| d.id != id);
            docs.len() != before
        };
        self.delete_index_entries(id).await?;
        Ok(removed)
    }

    async fn create_chat(&self, chat: &Chat) -> Result<()> {
        let mut chats = write(&self.chats)?;
        if chats.contains_key(&chat.id) {
            bail!("chat {} already exists", chat.id);
        }
        chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        Ok(read(&self.chats)?.get(id).cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = read(&self.chats)?.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(chats)
    }

    async fn count_chats(&self) -> Result<usize> {
        Ok(read(&self.chats)?.len())
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        let removed = write(&self.chats)?.remove(id).is_some();
        if removed {
            write(&self.messages)?.retain(|m| m.chat_id != id);
        }
        Ok(removed)
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        {
            let mut chats = write(&self.chats)?;
            let chat = chats
                .get_mut(&message.chat_id)
                .ok_or_else(|| anyhow!("chat {} not found", message.chat_id))?;
            chat.updated_at = message.created_at;
        }
        write(&self.messages)?.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = read(&self.messages)?
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order on equal timestamps.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn delete_message(&self, id: &str) -> Result<bool> {
        let mut messages = write(&self.messages)?;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        Ok(messages.len() != before)
    }

    async fn save_index_entries(
        &self,
        document_id: &str,
        entries: &[IndexEntry],
        model: &str,
    ) -> Result<()> {
        if !read(&self.docs)?.iter().any(|d| d.id == document_id) {
            bail!("document not found: {}", document_id);
        }
        let mut stored = write(&self.entries)?;
        stored.retain(|s| s.entry.chunk.document_id != document_id);
        stored.extend(entries.iter().map(|e| StoredEntry {
            model: model.to_string(),
            entry: e.clone(),
        }));
        Ok(())
    }

    async fn load_index_entries(&self, model: &str) -> Result<Vec<IndexEntry>> {
        let mut entries: Vec<IndexEntry> = read(&self.entries)?
            .iter()
            .filter(|s| s.model == model)
            .map(|s| s.entry.clone())
            .collect();
        entries.sort_by(|a, b| {
            a.chunk
                .document_id
                .cmp(&b.chunk.document_id)
                .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        Ok(entries)
    }

    async fn delete_index_entries(&self, document_id: &str) -> Result<()> {
        write(&self.entries)?.retain(|s| s.entry.chunk.document_id != document_id);
        Ok(())
    }
}
