use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ActivityKind, FollowDirection, RequestStatus, UserRecord};
use crate::error::Result;

/// Read-side accessor over the social graph replica.
///
/// The engine never mutates these tables; they are synced from the
/// identity/social services. Both the PostgreSQL implementation and the
/// in-memory test implementation live behind this trait.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Enumerate candidate users for an owner's rebuild.
    ///
    /// Always excludes the owner and deleted users. `exclude_related` drops
    /// users the owner already follows or is followed by; `exclude_pending`
    /// drops users the owner has a pending follow request towards.
    async fn list_active_candidates(
        &self,
        owner_id: Uuid,
        exclude_related: bool,
        exclude_pending: bool,
        limit: i64,
    ) -> Result<Vec<UserRecord>>;

    /// Fetch a single user, deleted or not.
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserRecord>>;

    /// Content item timestamps for a user within the last `days` days.
    async fn get_activity_window(
        &self,
        user_id: Uuid,
        days: i64,
    ) -> Result<Vec<(DateTime<Utc>, ActivityKind)>>;

    /// Follow edges of a user in one direction.
    async fn get_follow_edges(
        &self,
        user_id: Uuid,
        direction: FollowDirection,
    ) -> Result<HashSet<Uuid>>;

    /// Users in a mutual-follow relationship with `user_id`.
    async fn get_mutual_friends(&self, user_id: Uuid) -> Result<HashSet<Uuid>>;

    /// Page through all active user ids (scheduler enumeration).
    async fn list_user_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>>;
}

/// PostgreSQL implementation over the local graph replica tables.
#[derive(Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn list_active_candidates(
        &self,
        owner_id: Uuid,
        exclude_related: bool,
        exclude_pending: bool,
        limit: i64,
    ) -> Result<Vec<UserRecord>> {
        let candidates: Vec<UserRecord> = sqlx::query_as(
            r#"
            SELECT id, username, is_public, post_count, photo_count, created_at, deleted_at
            FROM users u
            WHERE u.deleted_at IS NULL
              AND u.id != $1
              AND ($2 = false OR (
                    NOT EXISTS (
                        SELECT 1 FROM follows f
                        WHERE f.follower_id = $1 AND f.following_id = u.id
                    )
                AND NOT EXISTS (
                        SELECT 1 FROM follows f
                        WHERE f.follower_id = u.id AND f.following_id = $1
                    )))
              AND ($3 = false OR NOT EXISTS (
                    SELECT 1 FROM follow_requests r
                    WHERE r.from_user = $1 AND r.to_user = u.id AND r.status = $4
                  ))
            ORDER BY u.created_at DESC
            LIMIT $5
            "#,
        )
        .bind(owner_id)
        .bind(exclude_related)
        .bind(exclude_pending)
        .bind(RequestStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            owner_id = %owner_id,
            count = candidates.len(),
            "Enumerated candidate users"
        );

        Ok(candidates)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let user: Option<UserRecord> = sqlx::query_as(
            r#"
            SELECT id, username, is_public, post_count, photo_count, created_at, deleted_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_activity_window(
        &self,
        user_id: Uuid,
        days: i64,
    ) -> Result<Vec<(DateTime<Utc>, ActivityKind)>> {
        let cutoff = Utc::now() - Duration::days(days);

        let rows: Vec<(DateTime<Utc>, String)> = sqlx::query_as(
            r#"
            SELECT created_at, kind
            FROM content_items
            WHERE author_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        // Unknown kinds from newer writers are skipped, not fatal.
        let items = rows
            .into_iter()
            .filter_map(|(created_at, kind)| match kind.as_str() {
                "post" => Some((created_at, ActivityKind::Post)),
                "photo" => Some((created_at, ActivityKind::Photo)),
                _ => None,
            })
            .collect();

        Ok(items)
    }

    async fn get_follow_edges(
        &self,
        user_id: Uuid,
        direction: FollowDirection,
    ) -> Result<HashSet<Uuid>> {
        let rows: Vec<(Uuid,)> = match direction {
            FollowDirection::Outgoing => {
                sqlx::query_as("SELECT following_id FROM follows WHERE follower_id = $1")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            FollowDirection::Incoming => {
                sqlx::query_as("SELECT follower_id FROM follows WHERE following_id = $1")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_mutual_friends(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        // Mutual = both directions present; derived, never stored.
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT f1.follower_id
            FROM follows f1
            INNER JOIN follows f2
                ON f1.follower_id = f2.following_id AND f1.following_id = f2.follower_id
            WHERE f1.following_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_user_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM users
            WHERE deleted_at IS NULL
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
