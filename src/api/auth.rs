use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{CurrentToken, CurrentUser};
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::auth::{hash_password, verify_password};
use crate::db::{SessionRepository, User, UserId, UserRepository, UserSummary};
use crate::error::AppError;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: User,
}

/// Validate and sanitize username
fn validate_username(username: &str) -> Result<String, AppError> {
    let trimmed = username.trim();

    if trimmed.len() < 3 || trimmed.len() > 32 {
        return Err(AppError::Validation(
            "Username must be 3-32 characters".to_string(),
        ));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Username must be alphanumeric, underscore, or hyphen".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<ApiResponse<User>, AppError> {
    let username = validate_username(&req.username)?;

    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    if UserRepository::get_by_username(&state.db, &username)
        .await?
        .is_some()
    {
        return Err(AppError::Validation("Username already exists".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = UserRepository::create(&state.db, &username, &password_hash).await?;
    tracing::info!(user_id = user.id, %username, "user registered");

    Ok(ApiResponse::created("Registered", user))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<ApiResponse<LoginResponse>, AppError> {
    let invalid = || AppError::Auth("Invalid credentials".to_string());
    let username = validate_username(&req.username).map_err(|_| invalid())?;

    let user = UserRepository::get_by_username(&state.db, &username)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(invalid());
    }

    let session =
        SessionRepository::create(&state.db, user.id, state.config.session_expiry_hours).await?;
    UserRepository::mark_active(&state.db, user.id).await?;
    tracing::info!(user_id = user.id, "user logged in");

    Ok(ApiResponse::ok(
        "Logged in",
        LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
            user,
        },
    ))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
) -> Result<ApiResponse<()>, AppError> {
    SessionRepository::delete(&state.db, &token).await?;
    Ok(ApiResponse::message("Logged out"))
}

/// GET /api/auth/me
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResponse<User> {
    ApiResponse::ok("Current user", user)
}

/// POST /api/auth/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<()>, AppError> {
    UserRepository::mark_active(&state.db, user.id).await?;
    Ok(ApiResponse::message("Heartbeat recorded"))
}

/// GET /api/users/:id
pub async fn user_public(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<ApiResponse<UserSummary>, AppError> {
    let summary = UserRepository::get_summary(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    Ok(ApiResponse::ok("User found", summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  Alice_01 ").unwrap(), "alice_01");
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("bad name").is_err());
        assert!(validate_username("émile").is_err());
    }
}
