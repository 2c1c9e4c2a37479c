use sqlx::{Pool, Sqlite};

use crate::db::models::{ChatMessage, UserId};
use crate::db::now_millis;
use crate::error::AppError;

/// Upper bound on message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4096;

const SELECT_MESSAGE: &str = r#"
SELECT m.id, m.sender_id, u.username AS sender_name, m.receiver_id,
       m.content, m.sent_at, m.is_read
FROM messages m
JOIN users u ON m.sender_id = u.id
"#;

/// Trim and bound-check message content.
pub fn normalize_content(content: &str) -> Result<&str, AppError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::EmptyContent);
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::ContentTooLong(MAX_CONTENT_CHARS));
    }
    Ok(trimmed)
}

/// Append-only direct message history.
pub struct MessageRepository;

impl MessageRepository {
    /// Store a message from `sender` to `receiver`.
    ///
    /// The friendship check and the insert are one statement, so a
    /// friendship removed concurrently either blocks the insert or happened
    /// after it. The stored timestamp never precedes the newest message of
    /// the conversation, keeping history append-ordered even if the clock
    /// steps back.
    pub async fn append(
        pool: &Pool<Sqlite>,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<ChatMessage, AppError> {
        let content = normalize_content(content)?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
INSERT INTO messages (sender_id, receiver_id, content, sent_at, is_read)
SELECT ?1, ?2, ?3,
       MAX(?4, COALESCE((
           SELECT MAX(sent_at) FROM messages
           WHERE (sender_id = ?1 AND receiver_id = ?2)
              OR (sender_id = ?2 AND receiver_id = ?1)
       ), 0)),
       0
WHERE EXISTS (
    SELECT 1 FROM friends
    WHERE is_approved = 1
      AND ((requester_id = ?1 AND target_id = ?2) OR (requester_id = ?2 AND target_id = ?1))
)
RETURNING id
            "#,
        )
        .bind(sender)
        .bind(receiver)
        .bind(content)
        .bind(now_millis())
        .fetch_optional(pool)
        .await?;

        let id = id.ok_or(AppError::NotFriends(sender, receiver))?;

        // Fetch with sender name joined
        let message = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created message".to_string()))?;

        tracing::debug!(message_id = id, sender, receiver, "message stored");
        Ok(message)
    }

    pub async fn get_by_id(pool: &Pool<Sqlite>, id: i64) -> Result<Option<ChatMessage>, AppError> {
        let message = sqlx::query_as::<_, ChatMessage>(&format!("{SELECT_MESSAGE} WHERE m.id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(message)
    }

    /// The whole conversation between two users, oldest first. An empty
    /// result says nothing about whether they are friends.
    pub async fn history(
        pool: &Pool<Sqlite>,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let messages = sqlx::query_as::<_, ChatMessage>(&format!(
            r#"{SELECT_MESSAGE}
WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
   OR (m.sender_id = ?2 AND m.receiver_id = ?1)
ORDER BY m.sent_at ASC, m.id ASC
            "#
        ))
        .bind(a)
        .bind(b)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    pub async fn last_between(
        pool: &Pool<Sqlite>,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ChatMessage>, AppError> {
        let message = sqlx::query_as::<_, ChatMessage>(&format!(
            r#"{SELECT_MESSAGE}
WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
   OR (m.sender_id = ?2 AND m.receiver_id = ?1)
ORDER BY m.sent_at DESC, m.id DESC
LIMIT 1
            "#
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await?;

        Ok(message)
    }

    /// Mark everything `other` sent to `reader` as read. Returns how many
    /// messages changed state; a repeat call returns 0.
    pub async fn mark_read(
        pool: &Pool<Sqlite>,
        reader: UserId,
        other: UserId,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
        )
        .bind(other)
        .bind(reader)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Unread messages addressed to `reader`, across all senders.
    pub async fn unread_count(pool: &Pool<Sqlite>, reader: UserId) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND is_read = 0",
        )
        .bind(reader)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Unread messages addressed to `reader` from one sender.
    pub async fn unread_from(
        pool: &Pool<Sqlite>,
        reader: UserId,
        sender: UserId,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND sender_id = ? AND is_read = 0",
        )
        .bind(reader)
        .bind(sender)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
