use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db::models::{Session, UserId};
use crate::db::now_millis;
use crate::error::AppError;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Bearer tokens handed out at login. A session row is the credential the
/// REST middleware and the live channel both verify.
pub struct SessionRepository;

impl SessionRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        user_id: UserId,
        expiry_hours: i64,
    ) -> Result<Session, AppError> {
        let created_at = now_millis();
        let expires_at = created_at + expiry_hours * MILLIS_PER_HOUR;

        let session = sqlx::query_as::<_, Session>(
            r#"
INSERT INTO sessions (id, user_id, token, expires_at, created_at)
VALUES (?, ?, ?, ?, ?)
RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(Uuid::new_v4().simple().to_string())
        .bind(expires_at)
        .bind(created_at)
        .fetch_one(pool)
        .await?;

        Ok(session)
    }

    /// Only unexpired sessions are returned.
    pub async fn get_by_token(
        pool: &Pool<Sqlite>,
        token: &str,
    ) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE token = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(now_millis())
        .fetch_optional(pool)
        .await?;

        Ok(session)
    }

    pub async fn delete(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn cleanup_expired(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn test_token_lifecycle() {
        let pool = testing::pool().await;
        let user = testing::user(&pool, "alice").await;

        let session = SessionRepository::create(&pool, user.id, 1).await.unwrap();
        let found = SessionRepository::get_by_token(&pool, &session.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, user.id);

        SessionRepository::delete(&pool, &session.token).await.unwrap();
        assert!(SessionRepository::get_by_token(&pool, &session.token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_invisible_and_purged() {
        let pool = testing::pool().await;
        let user = testing::user(&pool, "alice").await;

        let expired = SessionRepository::create(&pool, user.id, -1).await.unwrap();
        let live = SessionRepository::create(&pool, user.id, 1).await.unwrap();

        assert!(SessionRepository::get_by_token(&pool, &expired.token)
            .await
            .unwrap()
            .is_none());
        assert_eq!(SessionRepository::cleanup_expired(&pool).await.unwrap(), 1);
        assert!(SessionRepository::get_by_token(&pool, &live.token)
            .await
            .unwrap()
            .is_some());
    }
}
