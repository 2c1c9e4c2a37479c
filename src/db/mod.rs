pub mod friends;
pub mod messages;
pub mod models;
pub mod sessions;
pub mod users;

pub use friends::{FriendRepository, RequestDecision};
pub use messages::MessageRepository;
pub use models::{
    ChatMessage, FriendRelationship, Friendship, IncomingRequest, MessageEnvelope, Session, User,
    UserId, UserSummary,
};
pub use sessions::SessionRepository;
pub use users::UserRepository;

use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::error::AppError;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Open the pool and bring the schema up to date.
pub async fn connect(config: &Config) -> Result<SqlitePool, AppError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Single-connection in-memory database; the connection must never be
    /// recycled or the schema disappears with it.
    pub async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    pub async fn user(pool: &SqlitePool, username: &str) -> User {
        UserRepository::create(pool, username, "not-a-real-hash")
            .await
            .unwrap()
    }

    /// Two users with an approved friendship between them.
    pub async fn friends(pool: &SqlitePool, a: &str, b: &str) -> (User, User) {
        let a = user(pool, a).await;
        let b = user(pool, b).await;
        let request = FriendRepository::send_request(pool, a.id, b.id).await.unwrap();
        FriendRepository::handle(pool, request.id, b.id, RequestDecision::Approve)
            .await
            .unwrap();
        (a, b)
    }
}
