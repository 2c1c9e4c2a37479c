use axum::http::StatusCode;
use thiserror::Error;

use crate::db::models::UserId;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Users {0} and {1} are not friends")]
    NotFriends(UserId, UserId),

    #[error("Cannot send a friend request to yourself")]
    SelfRequest,

    #[error("A friend request between these users already exists")]
    DuplicateRequest,

    #[error("User {0} not found")]
    TargetNotFound(UserId),

    #[error("{0}")]
    NotFound(String),

    #[error("Message content is empty")]
    EmptyContent,

    #[error("Message must be at most {0} characters")]
    ContentTooLong(usize),

    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded - too many requests")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classes shared by the REST surface and the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Authorization,
    NotFound,
    Validation,
    Conflict,
    RateLimited,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Auth(_) => ErrorKind::Auth,
            AppError::Forbidden(_) | AppError::NotFriends(..) => ErrorKind::Authorization,
            AppError::NotFound(_) | AppError::TargetNotFound(_) => ErrorKind::NotFound,
            AppError::SelfRequest
            | AppError::EmptyContent
            | AppError::ContentTooLong(_)
            | AppError::Validation(_) => ErrorKind::Validation,
            AppError::DuplicateRequest => ErrorKind::Conflict,
            AppError::RateLimited => ErrorKind::RateLimited,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Axum IntoResponse implementation for HTTP errors
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "code": status.as_u16(),
            "message": message,
            "data": serde_json::Value::Null,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(AppError::Auth("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFriends(1, 2).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::DuplicateRequest.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::SelfRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TargetNotFound(9).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
