use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User identities are owned by the accounts table; everything else only
/// references them.
pub type UserId = i64;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_online: bool,
    /// Unix milliseconds of the last heartbeat or login.
    pub last_active: Option<i64>,
    pub created_at: i64,
}

/// The slice of a user other people are allowed to see.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_active: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// A directed friend request; `is_approved` turns it into a
/// bidirectional friendship.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRelationship {
    pub id: i64,
    pub requester_id: UserId,
    pub target_id: UserId,
    pub is_approved: bool,
    pub created_at: i64,
}

/// Pending request as shown to its addressee.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub id: i64,
    pub requester_id: UserId,
    pub requester_name: String,
    pub requester_avatar: Option<String>,
    pub created_at: i64,
}

/// An approved friendship resolved to the other party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    pub relationship_id: i64,
    pub since: i64,
    pub friend: UserSummary,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub sender_name: String, // Joined from users table
    pub receiver_id: UserId,
    pub content: String,
    /// Unix milliseconds.
    pub sent_at: i64,
    pub is_read: bool,
}

/// Wire shape of a message, shared by history responses and the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub id: i64,
    pub sender_id: UserId,
    pub sender_name: String,
    pub receiver_id: UserId,
    pub content: String,
    pub send_time: String,
    pub is_read: bool,
}

pub fn format_send_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

impl From<ChatMessage> for MessageEnvelope {
    fn from(message: ChatMessage) -> Self {
        MessageEnvelope {
            send_time: format_send_time(message.sent_at),
            id: message.id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            receiver_id: message.receiver_id,
            content: message.content,
            is_read: message.is_read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_time_format() {
        // 2024-01-02T03:04:05.678Z
        assert_eq!(format_send_time(1_704_164_645_678), "2024-01-02 03:04:05");
    }
}
