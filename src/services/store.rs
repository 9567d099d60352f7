//! Message store collaborator: durable create and conversation query.
//!
//! SYSTEM CONTEXT
//! ==============
//! The presence layer never owns messages. It calls `create` and, only after
//! the write is confirmed, hands the returned message to the delivery
//! router. `conversation` backs the client's on-demand history fetch, the
//! only recovery path for pushes missed while offline.
//!
//! Two adapters: Postgres for deployments, in-memory for tests and runs
//! without `DATABASE_URL`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::model::{Message, MessageContent, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it with its assigned id and timestamp.
    async fn create(&self, sender: &UserId, receiver: &UserId, content: MessageContent) -> Result<Message, StoreError>;

    /// Every message between `a` and `b`, oldest first.
    async fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError>;
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, sender: &UserId, receiver: &UserId, content: MessageContent) -> Result<Message, StoreError> {
        let mut messages = self.messages.write().await;
        // Keep timestamps strictly increasing so creation order is total.
        let created_at = messages
            .last()
            .map_or_else(now_ms, |last| now_ms().max(last.created_at + 1));
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            created_at,
            content,
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| m.is_between(a, b)).cloned().collect())
    }
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, sender: &UserId, receiver: &UserId, content: MessageContent) -> Result<Message, StoreError> {
        let id = Uuid::new_v4();
        let created_at = now_ms();
        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, file, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(sender.as_str())
        .bind(receiver.as_str())
        .bind(content.text.as_deref())
        .bind(content.image.as_deref())
        .bind(content.file.as_deref())
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Message { id, sender_id: sender.clone(), receiver_id: receiver.clone(), created_at, content })
    }

    async fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, text, image, file, created_at \
             FROM messages \
             WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1) \
             ORDER BY seq ASC",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Message {
                id: r.get("id"),
                sender_id: UserId::new(r.get::<String, _>("sender_id")),
                receiver_id: UserId::new(r.get::<String, _>("receiver_id")),
                created_at: r.get("created_at"),
                content: MessageContent { text: r.get("text"), image: r.get("image"), file: r.get("file") },
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
