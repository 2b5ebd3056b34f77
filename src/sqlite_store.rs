//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as unix milliseconds. Messages additionally carry
//! an autoincrement `seq` so that two messages created in the same
//! millisecond still list in insertion order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragchat_core::embedding::{blob_to_vec, vec_to_blob};
use ragchat_core::index::IndexEntry;
use ragchat_core::models::{Chat, Chunk, Document, Message};
use ragchat_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp: {}", ms))
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        index_ref: row.try_get("index_ref")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn row_to_chat(row: &SqliteRow) -> Result<Chat> {
    Ok(Chat {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        content: row.try_get("content")?,
        is_user: row.try_get("is_user")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, index_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.index_ref)
        .bind(doc.created_at.timestamp_millis())
        .bind(doc.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, content, index_ref, created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, index_ref, created_at, updated_at
            FROM documents
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn set_document_index_ref(&self, id: &str, index_ref: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET index_ref = ?, updated_at = ? WHERE id = ?")
            .bind(index_ref)
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("document {} not found", id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_chat(&self, chat: &Chat) -> Result<()> {
        sqlx::query("INSERT INTO chats (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&chat.id)
            .bind(&chat.title)
            .bind(chat.created_at.timestamp_millis())
            .bind(chat.updated_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT id, title, created_at, updated_at FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chat).transpose()
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, created_at, updated_at
            FROM chats
            ORDER BY updated_at DESC, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chat).collect()
    }

    async fn count_chats(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn delete_chat(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(message.created_at.timestamp_millis())
            .bind(&message.chat_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(anyhow!("chat {} not found", message.chat_id));
        }

        sqlx::query(
            "INSERT INTO messages (id, chat_id, content, is_user, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.content)
        .bind(message.is_user)
        .bind(message.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, content, is_user, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn last_message(&self, chat_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT id, chat_id, content, is_user, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn delete_message(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_index_entries(
        &self,
        document_id: &str,
        entries: &[IndexEntry],
        model: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors
                    (document_id, chunk_index, text, hash, document_hash, embedding, model)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(entry.chunk.chunk_index)
            .bind(&entry.chunk.text)
            .bind(&entry.chunk.hash)
            .bind(&entry.document_hash)
            .bind(vec_to_blob(&entry.vector))
            .bind(model)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_index_entries(&self, model: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, chunk_index, text, hash, document_hash, embedding
            FROM chunk_vectors
            WHERE model = ?
            ORDER BY document_id ASC, chunk_index ASC
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok(IndexEntry {
                    chunk: Chunk {
                        document_id: row.try_get("document_id")?,
                        chunk_index: row.try_get("chunk_index")?,
                        text: row.try_get("text")?,
                        hash: row.try_get("hash")?,
                    },
                    document_hash: row.try_get("document_hash")?,
                    vector: blob_to_vec(&blob),
                })
            })
            .collect()
    }

    async fn delete_index_entries(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
