use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::CurrentUser;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::db::{FriendRelationship, FriendRepository, IncomingRequest, RequestDecision, UserId};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct FriendRequestBody {
    pub friend_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct HandleRequestBody {
    pub agree: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingCount {
    pub count: i64,
}

/// POST /api/friends/requests
pub async fn send_request(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<FriendRequestBody>,
) -> Result<ApiResponse<FriendRelationship>, AppError> {
    let request = FriendRepository::send_request(&state.db, user.id, body.friend_id).await?;
    Ok(ApiResponse::created(
        "Friend request sent, waiting for approval",
        request,
    ))
}

/// GET /api/friends/requests
pub async fn list_incoming(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<Vec<IncomingRequest>>, AppError> {
    let requests = FriendRepository::list_incoming(&state.db, user.id).await?;
    Ok(ApiResponse::ok("Incoming friend requests", requests))
}

/// GET /api/friends/requests/count
pub async fn pending_count(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<PendingCount>, AppError> {
    let count = FriendRepository::pending_count(&state.db, user.id).await?;
    Ok(ApiResponse::ok("Pending friend requests", PendingCount { count }))
}

/// POST /api/friends/requests/:id
pub async fn handle_request(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(request_id): Path<i64>,
    Json(body): Json<HandleRequestBody>,
) -> Result<ApiResponse<FriendRelationship>, AppError> {
    let decision = RequestDecision::from(body.agree);
    let row = FriendRepository::handle(&state.db, request_id, user.id, decision).await?;

    let message = match decision {
        RequestDecision::Approve => "Friend request approved, you can chat now",
        RequestDecision::Reject => "Friend request rejected",
    };
    Ok(ApiResponse::ok(message, row))
}

/// DELETE /api/friends/requests/sent/:friend_id
pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(friend_id): Path<UserId>,
) -> Result<ApiResponse<()>, AppError> {
    FriendRepository::cancel(&state.db, user.id, friend_id).await?;
    Ok(ApiResponse::message("Friend request cancelled"))
}

/// DELETE /api/friends/:friend_id
pub async fn remove_friend(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(friend_id): Path<UserId>,
) -> Result<ApiResponse<()>, AppError> {
    FriendRepository::remove(&state.db, user.id, friend_id).await?;
    tracing::info!(user_id = user.id, friend_id, "friend removed");
    Ok(ApiResponse::message("Friend removed"))
}
