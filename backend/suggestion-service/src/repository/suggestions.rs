use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{FollowSuggestion, ScoredCandidate};
use crate::error::Result;

/// Persistence for the engine-owned `follow_suggestions` rows.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// All persisted rows for an owner, ordered by position.
    async fn get_for_owner(&self, owner_id: Uuid) -> Result<Vec<FollowSuggestion>>;

    /// Atomically replace an owner's set with `ranked` (already sorted).
    ///
    /// Positions are assigned 1..N from the slice order. Rows whose candidate
    /// also appears in the prior set keep their `last_shown`, `show_count`
    /// and `created_at`; `updated_at` is stamped with the refresh time.
    /// Readers see either the old or the new set, never a mix.
    async fn replace_for_owner(&self, owner_id: Uuid, ranked: &[ScoredCandidate]) -> Result<()>;

    /// Mark the given candidates as shown now.
    ///
    /// Single in-place UPDATE that leaves `updated_at` alone; that column
    /// tracks rebuild freshness, not exposure.
    async fn record_exposure(
        &self,
        owner_id: Uuid,
        candidate_ids: &[Uuid],
        shown_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete rows whose owner is gone or soft-deleted. Returns rows removed.
    async fn delete_orphaned(&self) -> Result<u64>;

    /// Delete low-value rows not refreshed for `staleness_hours`.
    async fn delete_stale(&self, staleness_hours: i64, score_cutoff: f64) -> Result<u64>;
}

/// PostgreSQL implementation.
#[derive(Clone)]
pub struct PgSuggestionStore {
    pool: PgPool,
}

impl PgSuggestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuggestionStore for PgSuggestionStore {
    async fn get_for_owner(&self, owner_id: Uuid) -> Result<Vec<FollowSuggestion>> {
        let rows: Vec<FollowSuggestion> = sqlx::query_as(
            r#"
            SELECT owner_id, candidate_id, score, position,
                   last_shown, show_count, created_at, updated_at
            FROM follow_suggestions
            WHERE owner_id = $1
            ORDER BY position
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn replace_for_owner(&self, owner_id: Uuid, ranked: &[ScoredCandidate]) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let prior: Vec<(Uuid, Option<DateTime<Utc>>, i32, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT candidate_id, last_shown, show_count, created_at
            FROM follow_suggestions
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_all(&mut *tx)
        .await?;

        let prior: HashMap<Uuid, (Option<DateTime<Utc>>, i32, DateTime<Utc>)> = prior
            .into_iter()
            .map(|(id, last_shown, show_count, created_at)| {
                (id, (last_shown, show_count, created_at))
            })
            .collect();

        sqlx::query("DELETE FROM follow_suggestions WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        for (idx, candidate) in ranked.iter().enumerate() {
            let (last_shown, show_count, created_at) = prior
                .get(&candidate.candidate_id)
                .map(|(last_shown, show_count, created_at)| {
                    (*last_shown, *show_count, *created_at)
                })
                .unwrap_or((None, 0, now));

            sqlx::query(
                r#"
                INSERT INTO follow_suggestions
                    (owner_id, candidate_id, score, position,
                     last_shown, show_count, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(owner_id)
            .bind(candidate.candidate_id)
            .bind(candidate.score)
            .bind((idx + 1) as i32)
            .bind(last_shown)
            .bind(show_count)
            .bind(created_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            owner_id = %owner_id,
            rows = ranked.len(),
            "Replaced persisted suggestion set"
        );

        Ok(())
    }

    async fn record_exposure(
        &self,
        owner_id: Uuid,
        candidate_ids: &[Uuid],
        shown_at: DateTime<Utc>,
    ) -> Result<()> {
        if candidate_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE follow_suggestions
            SET last_shown = $3, show_count = show_count + 1
            WHERE owner_id = $1 AND candidate_id = ANY($2)
            "#,
        )
        .bind(owner_id)
        .bind(candidate_ids)
        .bind(shown_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_orphaned(&self) -> Result<u64> {
        let removed = sqlx::query(
            r#"
            DELETE FROM follow_suggestions fs
            WHERE NOT EXISTS (
                SELECT 1 FROM users u
                WHERE u.id = fs.owner_id AND u.deleted_at IS NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed)
    }

    async fn delete_stale(&self, staleness_hours: i64, score_cutoff: f64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(staleness_hours);

        let removed = sqlx::query(
            r#"
            DELETE FROM follow_suggestions
            WHERE updated_at < $1 AND score <= $2
            "#,
        )
        .bind(cutoff)
        .bind(score_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed)
    }
}
