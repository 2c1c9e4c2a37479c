//! Friend requests and approved friendships.
//!
//! A row in `friends` is a directed request from `requester_id` to
//! `target_id`. Approval keeps the row and flips `is_approved`; rejection,
//! cancellation and removal delete it. Once approved the row is symmetric:
//! friendship queries match the pair in both directions. Each direction may
//! hold its own row, so a pair can carry two approved rows; removal deletes
//! both and listings collapse them to one friend.

use sqlx::{FromRow, Pool, Sqlite};

use crate::db::models::{FriendRelationship, Friendship, IncomingRequest, UserId, UserSummary};
use crate::db::{is_unique_violation, now_millis};
use crate::db::users::UserRepository;
use crate::error::AppError;

/// What the addressee of a pending request decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Approve,
    Reject,
}

impl From<bool> for RequestDecision {
    fn from(agree: bool) -> Self {
        if agree {
            RequestDecision::Approve
        } else {
            RequestDecision::Reject
        }
    }
}

#[derive(FromRow)]
struct FriendRow {
    relationship_id: i64,
    since: i64,
    id: UserId,
    username: String,
    avatar: Option<String>,
    is_online: bool,
    last_active: Option<i64>,
}

impl From<FriendRow> for Friendship {
    fn from(row: FriendRow) -> Self {
        Friendship {
            relationship_id: row.relationship_id,
            since: row.since,
            friend: UserSummary {
                id: row.id,
                username: row.username,
                avatar: row.avatar,
                is_online: row.is_online,
                last_active: row.last_active,
            },
        }
    }
}

pub struct FriendRepository;

impl FriendRepository {
    /// Create a pending request. An existing row from `requester` to
    /// `target`, pending or approved, makes this a duplicate; a row in the
    /// opposite direction does not.
    pub async fn send_request(
        pool: &Pool<Sqlite>,
        requester: UserId,
        target: UserId,
    ) -> Result<FriendRelationship, AppError> {
        if requester == target {
            return Err(AppError::SelfRequest);
        }
        if !UserRepository::exists(pool, target).await? {
            return Err(AppError::TargetNotFound(target));
        }

        let inserted = sqlx::query_as::<_, FriendRelationship>(
            r#"
INSERT INTO friends (requester_id, target_id, is_approved, created_at)
SELECT ?1, ?2, 0, ?3
WHERE NOT EXISTS (
    SELECT 1 FROM friends WHERE requester_id = ?1 AND target_id = ?2
)
RETURNING *
            "#,
        )
        .bind(requester)
        .bind(target)
        .bind(now_millis())
        .fetch_optional(pool)
        .await;

        match inserted {
            Ok(Some(row)) => {
                tracing::debug!(requester, target, request_id = row.id, "friend request created");
                Ok(row)
            }
            Ok(None) => Err(AppError::DuplicateRequest),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateRequest),
            Err(e) => Err(e.into()),
        }
    }

    /// Pending requests addressed to `target`, newest first.
    pub async fn list_incoming(
        pool: &Pool<Sqlite>,
        target: UserId,
    ) -> Result<Vec<IncomingRequest>, AppError> {
        let requests = sqlx::query_as::<_, IncomingRequest>(
            r#"
SELECT f.id, f.requester_id, u.username AS requester_name,
       u.avatar AS requester_avatar, f.created_at
FROM friends f
JOIN users u ON u.id = f.requester_id
WHERE f.target_id = ? AND f.is_approved = 0
ORDER BY f.created_at DESC, f.id DESC
            "#,
        )
        .bind(target)
        .fetch_all(pool)
        .await?;

        Ok(requests)
    }

    pub async fn pending_count(pool: &Pool<Sqlite>, target: UserId) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM friends WHERE target_id = ? AND is_approved = 0",
        )
        .bind(target)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Approve or reject a pending request addressed to `acting_user`.
    /// Returns the row as it stands after approval, or as it was before
    /// deletion on rejection.
    pub async fn handle(
        pool: &Pool<Sqlite>,
        request_id: i64,
        acting_user: UserId,
        decision: RequestDecision,
    ) -> Result<FriendRelationship, AppError> {
        let sql = match decision {
            RequestDecision::Approve => {
                r#"
UPDATE friends SET is_approved = 1
WHERE id = ? AND target_id = ? AND is_approved = 0
RETURNING *
                "#
            }
            RequestDecision::Reject => {
                r#"
DELETE FROM friends
WHERE id = ? AND target_id = ? AND is_approved = 0
RETURNING *
                "#
            }
        };

        let row = sqlx::query_as::<_, FriendRelationship>(sql)
            .bind(request_id)
            .bind(acting_user)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Friend request {} not found or not addressed to you",
                    request_id
                ))
            })?;

        tracing::debug!(request_id, acting_user, ?decision, "friend request handled");
        Ok(row)
    }

    /// Withdraw a still-pending request sent by `requester`.
    pub async fn cancel(
        pool: &Pool<Sqlite>,
        requester: UserId,
        target: UserId,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "DELETE FROM friends WHERE requester_id = ? AND target_id = ? AND is_approved = 0",
        )
        .bind(requester)
        .bind(target)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(
                "Friend request not found or already handled".to_string(),
            ));
        }
        Ok(())
    }

    /// Delete the approved friendship between the two users, whoever sent
    /// the original request. Both directions go in one statement.
    pub async fn remove(
        pool: &Pool<Sqlite>,
        acting_user: UserId,
        other: UserId,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
DELETE FROM friends
WHERE is_approved = 1
  AND ((requester_id = ?1 AND target_id = ?2) OR (requester_id = ?2 AND target_id = ?1))
            "#,
        )
        .bind(acting_user)
        .bind(other)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Friendship not found".to_string()));
        }
        tracing::debug!(acting_user, other, "friendship removed");
        Ok(())
    }

    pub async fn is_active_friend(
        pool: &Pool<Sqlite>,
        a: UserId,
        b: UserId,
    ) -> Result<bool, AppError> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
SELECT 1 FROM friends
WHERE is_approved = 1
  AND ((requester_id = ?1 AND target_id = ?2) OR (requester_id = ?2 AND target_id = ?1))
LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }

    /// Approved friendships of `user`, newest first, each resolved to the
    /// other party. A friend approved in both directions appears once, under
    /// the older row.
    pub async fn list_active_friends(
        pool: &Pool<Sqlite>,
        user: UserId,
    ) -> Result<Vec<Friendship>, AppError> {
        let rows = sqlx::query_as::<_, FriendRow>(
            r#"
SELECT MIN(f.id) AS relationship_id, MIN(f.created_at) AS since,
       u.id, u.username, u.avatar, u.is_online, u.last_active
FROM friends f
JOIN users u
  ON u.id = CASE WHEN f.requester_id = ?1 THEN f.target_id ELSE f.requester_id END
WHERE f.is_approved = 1 AND (f.requester_id = ?1 OR f.target_id = ?1)
GROUP BY u.id
ORDER BY since DESC, relationship_id DESC
            "#,
        )
        .bind(user)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Friendship::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn test_self_request_rejected() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;

        let err = FriendRepository::send_request(&pool, alice.id, alice.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SelfRequest));
    }

    #[tokio::test]
    async fn test_unknown_target_rejected() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;

        let err = FriendRepository::send_request(&pool, alice.id, 999)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TargetNotFound(999)));
    }

    #[tokio::test]
    async fn test_duplicate_pending_and_approved() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let request = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        assert!(!request.is_approved);

        let err = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRequest));

        FriendRepository::handle(&pool, request.id, bob.id, RequestDecision::Approve)
            .await
            .unwrap();
        let err = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRequest));
    }

    #[tokio::test]
    async fn test_reverse_direction_is_a_separate_request() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let from_bob = FriendRepository::send_request(&pool, bob.id, alice.id)
            .await
            .unwrap();
        let from_alice = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        assert_ne!(from_bob.id, from_alice.id);
        assert_eq!(from_alice.requester_id, alice.id);
        assert_eq!(FriendRepository::pending_count(&pool, alice.id).await.unwrap(), 1);
        assert_eq!(FriendRepository::pending_count(&pool, bob.id).await.unwrap(), 1);

        // Approving both leaves one friendship, listed once on each side.
        FriendRepository::handle(&pool, from_bob.id, alice.id, RequestDecision::Approve)
            .await
            .unwrap();
        FriendRepository::handle(&pool, from_alice.id, bob.id, RequestDecision::Approve)
            .await
            .unwrap();
        let alice_friends = FriendRepository::list_active_friends(&pool, alice.id)
            .await
            .unwrap();
        assert_eq!(alice_friends.len(), 1);
        assert_eq!(alice_friends[0].relationship_id, from_bob.id);
        assert_eq!(
            FriendRepository::list_active_friends(&pool, bob.id)
                .await
                .unwrap()
                .len(),
            1
        );

        // One removal severs the pair in both directions.
        FriendRepository::remove(&pool, alice.id, bob.id).await.unwrap();
        assert!(!FriendRepository::is_active_friend(&pool, alice.id, bob.id)
            .await
            .unwrap());
        assert!(!FriendRepository::is_active_friend(&pool, bob.id, alice.id)
            .await
            .unwrap());
        let err = FriendRepository::remove(&pool, bob.id, alice.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_incoming_newest_first_and_count() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;
        let carol = testing::user(&pool, "carol").await;

        let first = FriendRepository::send_request(&pool, alice.id, carol.id)
            .await
            .unwrap();
        let second = FriendRepository::send_request(&pool, bob.id, carol.id)
            .await
            .unwrap();

        let incoming = FriendRepository::list_incoming(&pool, carol.id).await.unwrap();
        let ids: Vec<i64> = incoming.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(incoming[0].requester_name, "bob");
        assert_eq!(FriendRepository::pending_count(&pool, carol.id).await.unwrap(), 2);
        assert!(FriendRepository::list_incoming(&pool, alice.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_approve_makes_friendship_bidirectional() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let request = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        assert!(!FriendRepository::is_active_friend(&pool, alice.id, bob.id)
            .await
            .unwrap());

        let row = FriendRepository::handle(&pool, request.id, bob.id, RequestDecision::Approve)
            .await
            .unwrap();
        assert!(row.is_approved);
        assert!(FriendRepository::is_active_friend(&pool, alice.id, bob.id)
            .await
            .unwrap());
        assert!(FriendRepository::is_active_friend(&pool, bob.id, alice.id)
            .await
            .unwrap());
        assert!(FriendRepository::list_incoming(&pool, bob.id)
            .await
            .unwrap()
            .is_empty());

        let alice_friends = FriendRepository::list_active_friends(&pool, alice.id)
            .await
            .unwrap();
        let bob_friends = FriendRepository::list_active_friends(&pool, bob.id)
            .await
            .unwrap();
        assert_eq!(alice_friends.len(), 1);
        assert_eq!(alice_friends[0].friend.id, bob.id);
        assert_eq!(bob_friends[0].friend.username, "alice");
    }

    #[tokio::test]
    async fn test_reject_deletes_row_and_allows_resend() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let request = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        FriendRepository::handle(&pool, request.id, bob.id, RequestDecision::Reject)
            .await
            .unwrap();

        assert!(!FriendRepository::is_active_friend(&pool, alice.id, bob.id)
            .await
            .unwrap());
        let err = FriendRepository::handle(&pool, request.id, bob.id, RequestDecision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_addressee_can_handle() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let request = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        let err = FriendRepository::handle(&pool, request.id, alice.id, RequestDecision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_pending_only() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;

        let err = FriendRepository::cancel(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let request = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        // Only the requester can cancel.
        assert!(FriendRepository::cancel(&pool, bob.id, alice.id).await.is_err());
        FriendRepository::cancel(&pool, alice.id, bob.id).await.unwrap();
        assert_eq!(FriendRepository::pending_count(&pool, bob.id).await.unwrap(), 0);

        let request2 = FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();
        assert_ne!(request.id, request2.id);
        FriendRepository::handle(&pool, request2.id, bob.id, RequestDecision::Approve)
            .await
            .unwrap();
        let err = FriendRepository::cancel(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_from_either_side() {
        let pool = testing::pool().await;
        let (alice, bob) = testing::friends(&pool, "alice", "bob").await;

        // The addressee can remove too.
        FriendRepository::remove(&pool, bob.id, alice.id).await.unwrap();
        assert!(!FriendRepository::is_active_friend(&pool, alice.id, bob.id)
            .await
            .unwrap());
        assert!(FriendRepository::list_active_friends(&pool, alice.id)
            .await
            .unwrap()
            .is_empty());

        let err = FriendRepository::remove(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_ignores_pending() {
        let pool = testing::pool().await;
        let alice = testing::user(&pool, "alice").await;
        let bob = testing::user(&pool, "bob").await;
        FriendRepository::send_request(&pool, alice.id, bob.id)
            .await
            .unwrap();

        let err = FriendRepository::remove(&pool, alice.id, bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(FriendRepository::pending_count(&pool, bob.id).await.unwrap(), 1);
    }
}
