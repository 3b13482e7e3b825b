//! Stored chat conversations, one per user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use judgeloop_shared::{ChatHistory, ChatMessage, JudgeloopError, Result};

use crate::{Storage, db_err};

#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Start (or restart) a conversation seeded with the assistant greeting.
    ///
    /// Fails with `NotFound` if the user is not registered.
    async fn create(&self, email: &str, greeting: &str) -> Result<ChatHistory>;

    /// The stored conversation, if any.
    async fn load(&self, email: &str) -> Result<Option<ChatHistory>>;

    /// Append messages in order. Fails with `NotFound` if no conversation exists.
    async fn append(&self, email: &str, messages: &[ChatMessage]) -> Result<()>;

    /// Drop every message and re-seed with the greeting.
    async fn clear(&self, email: &str, greeting: &str) -> Result<ChatHistory>;
}

fn encode_messages(messages: &[ChatMessage]) -> Result<String> {
    serde_json::to_string(messages).map_err(|e| JudgeloopError::Storage(e.to_string()))
}

#[async_trait]
impl ChatHistoryStore for Storage {
    async fn create(&self, email: &str, greeting: &str) -> Result<ChatHistory> {
        self.require_user(email).await?;
        let history = ChatHistory {
            email: email.to_string(),
            created_at: Utc::now(),
            messages: vec![ChatMessage::assistant(greeting)],
        };
        let messages = encode_messages(&history.messages)?;
        self.conn()
            .execute(
                "INSERT INTO chat_history (email, created_at, messages) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO UPDATE SET
                   created_at = excluded.created_at,
                   messages = excluded.messages",
                params![email, history.created_at.to_rfc3339(), messages.as_str()],
            )
            .await
            .map_err(db_err)?;
        tracing::debug!(email, "chat history created");
        Ok(history)
    }

    async fn load(&self, email: &str) -> Result<Option<ChatHistory>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT created_at, messages FROM chat_history WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let created_at: String = row.get(0).map_err(db_err)?;
        let raw: String = row.get(1).map_err(db_err)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| JudgeloopError::Storage(format!("invalid date: {e}")))?;
        let messages = serde_json::from_str(&raw)
            .map_err(|e| JudgeloopError::Storage(format!("corrupt chat history: {e}")))?;

        Ok(Some(ChatHistory {
            email: email.to_string(),
            created_at,
            messages,
        }))
    }

    async fn append(&self, email: &str, messages: &[ChatMessage]) -> Result<()> {
        let mut history = self
            .load(email)
            .await?
            .ok_or_else(|| JudgeloopError::NotFound(format!("chat history for '{email}'")))?;
        history.messages.extend_from_slice(messages);

        let encoded = encode_messages(&history.messages)?;
        self.conn()
            .execute(
                "UPDATE chat_history SET messages = ?1 WHERE email = ?2",
                params![encoded.as_str(), email],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn clear(&self, email: &str, greeting: &str) -> Result<ChatHistory> {
        self.create(email, greeting).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserStore;
    use crate::test_support::test_storage;
    use judgeloop_shared::ChatRole;

    const GREETING: &str = "¡Hola! ¿En qué puedo ayudarte hoy?";

    async fn registered_storage() -> (tempfile::TempDir, Storage) {
        let (dir, storage) = test_storage().await;
        storage.register("ana@example.com", "s3cret", 3).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn create_seeds_greeting() {
        let (_dir, storage) = registered_storage().await;
        assert!(storage.load("ana@example.com").await.unwrap().is_none());

        storage.create("ana@example.com", GREETING).await.unwrap();
        let history = storage.load("ana@example.com").await.unwrap().unwrap();
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].role, ChatRole::Assistant);
        assert_eq!(history.messages[0].content, GREETING);
    }

    #[tokio::test]
    async fn append_then_clear() {
        let (_dir, storage) = registered_storage().await;
        storage.create("ana@example.com", GREETING).await.unwrap();
        storage
            .append(
                "ana@example.com",
                &[
                    ChatMessage::user("¿Qué cursos de Python hay?"),
                    ChatMessage::assistant("['Curso: Python básico']"),
                ],
            )
            .await
            .unwrap();

        let history = storage.load("ana@example.com").await.unwrap().unwrap();
        assert_eq!(history.messages.len(), 3);
        assert_eq!(history.messages[1].role, ChatRole::User);

        let cleared = storage.clear("ana@example.com", GREETING).await.unwrap();
        assert_eq!(cleared.messages.len(), 1);
        let reloaded = storage.load("ana@example.com").await.unwrap().unwrap();
        assert_eq!(reloaded.messages, cleared.messages);
    }

    #[tokio::test]
    async fn append_without_history_is_not_found() {
        let (_dir, storage) = test_storage().await;
        let err = storage
            .append("ana@example.com", &[ChatMessage::user("hola")])
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeloopError::NotFound(_)));
    }

    #[tokio::test]
    async fn unregistered_user_has_no_history_to_create() {
        let (_dir, storage) = test_storage().await;
        let err = storage.create("bob@example.com", GREETING).await.unwrap_err();
        assert!(matches!(err, JudgeloopError::NotFound(_)));
        let err = storage.clear("bob@example.com", GREETING).await.unwrap_err();
        assert!(matches!(err, JudgeloopError::NotFound(_)));
        assert!(storage.load("bob@example.com").await.unwrap().is_none());
    }
}
