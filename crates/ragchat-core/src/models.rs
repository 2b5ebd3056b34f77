//! Core data models: documents, chats, messages and the transient chunks
//! produced during indexing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A stored document whose content feeds the embedding index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Where this document's entries live in the index; `None` until indexed.
    pub index_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new, not yet indexed document with a fresh UUID.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            index_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// SHA-256 of the content, used to detect whether the index is stale.
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.content)
    }
}

/// A bounded-length slice of a document's content.
///
/// Chunks only exist while a document is being indexed; their text and
/// vectors are what the index keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Title given to chats created without one: `"New Chat {n}"`, where
    /// `n` is one more than the number of existing chats.
    pub fn default_title(existing_chats: usize) -> String {
        format!("New Chat {}", existing_chats + 1)
    }
}

/// One turn in a chat, authored either by the user or the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub is_user: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(chat_id: &str, content: impl Into<String>) -> Self {
        Self::new(chat_id, content, true)
    }

    pub fn assistant(chat_id: &str, content: impl Into<String>) -> Self {
        Self::new(chat_id, content, false)
    }

    fn new(chat_id: &str, content: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            content: content.into(),
            is_user,
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        if self.is_user {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

/// Author of a conversation turn as seen by the generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A `(role, text)` pair of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_title_counts_from_one() {
        assert_eq!(Chat::default_title(0), "New Chat 1");
        assert_eq!(Chat::default_title(4), "New Chat 5");
    }

    #[test]
    fn test_message_roles() {
        assert_eq!(Message::user("c", "hi").role(), Role::User);
        assert_eq!(Message::assistant("c", "hello").role(), Role::Assistant);
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = Document::new("t", "The sky is blue.");
        let mut b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        b.content.push('!');
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
