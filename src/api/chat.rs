use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::api::middleware::CurrentUser;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::db::users::is_recently_active;
use crate::db::{
    now_millis, FriendRepository, MessageEnvelope, MessageRepository, UserId, UserSummary,
};
use crate::error::AppError;
use crate::gateway;

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub friend_id: UserId,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub friend_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct FriendOverview {
    pub relationship_id: i64,
    pub since: i64,
    pub friend: UserSummary,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub unread_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: u64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total_unread: i64,
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Every active friend of `user` with the data a conversation list needs.
pub async fn friend_overviews(
    pool: &Pool<Sqlite>,
    user: UserId,
    presence_window_secs: i64,
) -> Result<Vec<FriendOverview>, AppError> {
    let now = now_millis();
    let friendships = FriendRepository::list_active_friends(pool, user).await?;

    let mut overviews = Vec::with_capacity(friendships.len());
    for friendship in friendships {
        let friend_id = friendship.friend.id;
        let last = MessageRepository::last_between(pool, user, friend_id).await?;
        let unread_count = MessageRepository::unread_from(pool, user, friend_id).await?;

        let (last_message, last_message_time) = match last {
            Some(message) => {
                let envelope = MessageEnvelope::from(message);
                (Some(preview(&envelope.content)), Some(envelope.send_time))
            }
            None => (None, None),
        };

        overviews.push(FriendOverview {
            relationship_id: friendship.relationship_id,
            since: friendship.since,
            is_active: is_recently_active(
                friendship.friend.last_active,
                now,
                presence_window_secs,
            ),
            friend: friendship.friend,
            last_message,
            last_message_time,
            unread_count,
        });
    }
    Ok(overviews)
}

/// GET /api/chat/friends
pub async fn list_friends(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<Vec<FriendOverview>>, AppError> {
    let overviews =
        friend_overviews(&state.db, user.id, state.config.presence_window_secs).await?;
    let message = if overviews.is_empty() {
        "No friends yet"
    } else {
        "Friend list"
    };
    Ok(ApiResponse::ok(message, overviews))
}

/// GET /api/chat/messages/:friend_id
pub async fn get_history(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(friend_id): Path<UserId>,
) -> Result<ApiResponse<Vec<MessageEnvelope>>, AppError> {
    if !FriendRepository::is_active_friend(&state.db, user.id, friend_id).await? {
        return Err(AppError::Forbidden(
            "Friendship does not exist or is not approved".to_string(),
        ));
    }

    let messages = MessageRepository::history(&state.db, user.id, friend_id)
        .await?
        .into_iter()
        .map(MessageEnvelope::from)
        .collect();

    Ok(ApiResponse::ok("Message history", messages))
}

/// POST /api/chat/send
pub async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<ApiResponse<MessageEnvelope>, AppError> {
    let envelope =
        gateway::publish(&state.db, &state.rooms, user.id, req.friend_id, &req.content).await?;
    Ok(ApiResponse::created("Message sent", envelope))
}

/// POST /api/chat/mark-read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<ApiResponse<MarkReadResponse>, AppError> {
    let marked = MessageRepository::mark_read(&state.db, user.id, req.friend_id).await?;
    Ok(ApiResponse::ok("Marked as read", MarkReadResponse { marked }))
}

/// GET /api/chat/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<UnreadCountResponse>, AppError> {
    let total_unread = MessageRepository::unread_count(&state.db, user.id).await?;
    Ok(ApiResponse::ok(
        "Unread count",
        UnreadCountResponse { total_unread },
    ))
}
