//! Identity and credential verification.
//!
//! Credentials are opaque bearer tokens issued at login (see
//! [`SessionRepository`]). Both the REST middleware and the live channel
//! resolve them through [`verify_credential`].

pub mod password;

pub use password::{hash_password, verify_password};

use sqlx::{Pool, Sqlite};

use crate::db::{SessionRepository, User, UserRepository};
use crate::error::AppError;

/// Resolve a bearer credential to the user it belongs to.
pub async fn verify_credential(pool: &Pool<Sqlite>, token: &str) -> Result<User, AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Auth("Missing credential".to_string()));
    }

    let session = SessionRepository::get_by_token(pool, token)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid or expired session".to_string()))?;

    UserRepository::get_by_id(pool, session.user_id)
        .await?
        .ok_or_else(|| AppError::Auth("Session user no longer exists".to_string()))
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Result<&str, AppError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Auth("Invalid Authorization format".to_string()))
}
