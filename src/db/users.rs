use std::time::Duration;

use sqlx::{Pool, Sqlite};

use crate::db::models::{User, UserId, UserSummary};
use crate::db::{is_unique_violation, now_millis};
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        username: &str,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let created_at = now_millis();

        let user = sqlx::query_as::<_, User>(
            r#"
INSERT INTO users (username, password_hash, created_at)
VALUES (?, ?, ?)
RETURNING *
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(created_at)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Validation("Username already exists".to_string())
            } else {
                e.into()
            }
        })?;

        Ok(user)
    }

    pub async fn get_by_username(
        pool: &Pool<Sqlite>,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn get_by_id(pool: &Pool<Sqlite>, id: UserId) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn get_summary(
        pool: &Pool<Sqlite>,
        id: UserId,
    ) -> Result<Option<UserSummary>, AppError> {
        let summary = sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, avatar, is_online, last_active FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(summary)
    }

    pub async fn exists(pool: &Pool<Sqlite>, id: UserId) -> Result<bool, AppError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(found.is_some())
    }

    /// Heartbeat: stamp the user as seen now and online.
    pub async fn mark_active(pool: &Pool<Sqlite>, id: UserId) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET last_active = ?, is_online = 1 WHERE id = ?")
            .bind(now_millis())
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    /// Flip users offline whose last activity is older than `timeout`.
    /// Users that never reported activity count as stale. Returns the
    /// number of users changed.
    pub async fn sweep_stale(pool: &Pool<Sqlite>, timeout: Duration) -> Result<u64, AppError> {
        let cutoff = now_millis() - timeout.as_millis() as i64;

        let result = sqlx::query(
            r#"
UPDATE users SET is_online = 0
WHERE is_online = 1 AND (last_active IS NULL OR last_active < ?)
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub(crate) async fn set_last_active(pool: &Pool<Sqlite>, id: UserId, at: i64) {
        sqlx::query("UPDATE users SET last_active = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }
}

/// Liveness indicator: seen within `window_secs` of `now` (both millis).
pub fn is_recently_active(last_active: Option<i64>, now: i64, window_secs: i64) -> bool {
    match last_active {
        Some(at) => now.saturating_sub(at) <= window_secs.saturating_mul(1000),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn test_concurrent_create_same_username() {
        let pool = testing::pool().await;
        let (first, second) = tokio::join!(
            UserRepository::create(&pool, "alice", "hash"),
            UserRepository::create(&pool, "alice", "hash"),
        );

        let (ok, err) = match (first, second) {
            (Ok(user), Err(err)) | (Err(err), Ok(user)) => (user, err),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert_eq!(ok.username, "alice");
        assert!(matches!(err, AppError::Validation(ref m) if m == "Username already exists"));
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let pool = testing::pool().await;
        let user = UserRepository::create(&pool, "alice", "hash").await.unwrap();

        let by_name = UserRepository::get_by_username(&pool, "alice").await.unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(user.id));
        assert!(UserRepository::exists(&pool, user.id).await.unwrap());
        assert!(!UserRepository::exists(&pool, user.id + 100).await.unwrap());
        assert!(!user.is_online);
        assert_eq!(user.last_active, None);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let pool = testing::pool().await;
        UserRepository::create(&pool, "alice", "hash").await.unwrap();
        let err = UserRepository::create(&pool, "alice", "hash").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }

    #[tokio::test]
    async fn test_mark_active_then_sweep() {
        let pool = testing::pool().await;
        let fresh = testing::user(&pool, "fresh").await;
        let stale = testing::user(&pool, "stale").await;

        UserRepository::mark_active(&pool, fresh.id).await.unwrap();
        UserRepository::mark_active(&pool, stale.id).await.unwrap();
        UserRepository::set_last_active(&pool, stale.id, now_millis() - 10 * 60 * 1000).await;

        let swept = UserRepository::sweep_stale(&pool, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let fresh = UserRepository::get_by_id(&pool, fresh.id).await.unwrap().unwrap();
        let stale = UserRepository::get_by_id(&pool, stale.id).await.unwrap().unwrap();
        assert!(fresh.is_online);
        assert!(!stale.is_online);

        // Nothing left to flip.
        let swept = UserRepository::sweep_stale(&pool, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(swept, 0);
    }

    #[tokio::test]
    async fn test_mark_active_unknown_user() {
        let pool = testing::pool().await;
        let err = UserRepository::mark_active(&pool, 42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_recently_active_window() {
        let now = 1_000_000;
        assert!(is_recently_active(Some(now - 179_000), now, 180));
        assert!(is_recently_active(Some(now - 180_000), now, 180));
        assert!(!is_recently_active(Some(now - 181_000), now, 180));
        assert!(!is_recently_active(None, now, 180));
    }
}
