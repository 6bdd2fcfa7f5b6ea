//! In-memory store implementations.
//!
//! Mirror the PostgreSQL semantics (atomic replace with carry-over, dense
//! positions, in-place exposure updates) so the engine, jobs and handlers can
//! be exercised without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ActivityKind, FollowDirection, FollowSuggestion, ScoredCandidate, UserRecord};
use crate::error::Result;
use crate::repository::{GraphStore, SuggestionStore};

#[derive(Default)]
struct GraphData {
    users: HashMap<Uuid, UserRecord>,
    /// (follower, following)
    follows: HashSet<(Uuid, Uuid)>,
    /// (from, to) with status pending
    pending_requests: HashSet<(Uuid, Uuid)>,
    activity: HashMap<Uuid, Vec<(DateTime<Utc>, ActivityKind)>>,
}

/// Fixture-friendly graph store.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: Mutex<GraphData>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: UserRecord) {
        self.inner.lock().await.users.insert(user.id, user);
    }

    pub async fn remove_user(&self, user_id: Uuid) {
        self.inner.lock().await.users.remove(&user_id);
    }

    pub async fn mark_deleted(&self, user_id: Uuid) {
        if let Some(user) = self.inner.lock().await.users.get_mut(&user_id) {
            user.deleted_at = Some(Utc::now());
        }
    }

    pub async fn add_follow(&self, follower_id: Uuid, following_id: Uuid) {
        self.inner
            .lock()
            .await
            .follows
            .insert((follower_id, following_id));
    }

    pub async fn remove_follow(&self, follower_id: Uuid, following_id: Uuid) {
        self.inner
            .lock()
            .await
            .follows
            .remove(&(follower_id, following_id));
    }

    pub async fn add_pending_request(&self, from_user: Uuid, to_user: Uuid) {
        self.inner
            .lock()
            .await
            .pending_requests
            .insert((from_user, to_user));
    }

    pub async fn add_activity(&self, user_id: Uuid, at: DateTime<Utc>, kind: ActivityKind) {
        self.inner
            .lock()
            .await
            .activity
            .entry(user_id)
            .or_default()
            .push((at, kind));
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn list_active_candidates(
        &self,
        owner_id: Uuid,
        exclude_related: bool,
        exclude_pending: bool,
        limit: i64,
    ) -> Result<Vec<UserRecord>> {
        let data = self.inner.lock().await;

        let mut candidates: Vec<UserRecord> = data
            .users
            .values()
            .filter(|u| u.id != owner_id && u.deleted_at.is_none())
            .filter(|u| {
                if !exclude_related {
                    return true;
                }
                !data.follows.contains(&(owner_id, u.id))
                    && !data.follows.contains(&(u.id, owner_id))
            })
            .filter(|u| !exclude_pending || !data.pending_requests.contains(&(owner_id, u.id)))
            .cloned()
            .collect();

        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.inner.lock().await.users.get(&user_id).cloned())
    }

    async fn get_activity_window(
        &self,
        user_id: Uuid,
        days: i64,
    ) -> Result<Vec<(DateTime<Utc>, ActivityKind)>> {
        let cutoff = Utc::now() - Duration::days(days);
        let data = self.inner.lock().await;

        Ok(data
            .activity
            .get(&user_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|(at, _)| *at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_follow_edges(
        &self,
        user_id: Uuid,
        direction: FollowDirection,
    ) -> Result<HashSet<Uuid>> {
        let data = self.inner.lock().await;

        Ok(data
            .follows
            .iter()
            .filter_map(|(follower, following)| match direction {
                FollowDirection::Outgoing if *follower == user_id => Some(*following),
                FollowDirection::Incoming if *following == user_id => Some(*follower),
                _ => None,
            })
            .collect())
    }

    async fn get_mutual_friends(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        let data = self.inner.lock().await;

        Ok(data
            .follows
            .iter()
            .filter(|(follower, following)| {
                *following == user_id && data.follows.contains(&(user_id, *follower))
            })
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn list_user_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>> {
        let data = self.inner.lock().await;

        let mut ids: Vec<Uuid> = data
            .users
            .values()
            .filter(|u| u.deleted_at.is_none())
            .map(|u| u.id)
            .collect();
        ids.sort();

        Ok(ids
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// In-memory suggestion store. Tracks a deleted-owner set so cleanup paths
/// are testable without the users table.
#[derive(Default)]
pub struct InMemorySuggestionStore {
    rows: Mutex<HashMap<Uuid, Vec<FollowSuggestion>>>,
    inactive_owners: Mutex<HashSet<Uuid>>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an owner as deleted/missing for `delete_orphaned`.
    pub async fn mark_owner_inactive(&self, owner_id: Uuid) {
        self.inactive_owners.lock().await.insert(owner_id);
    }

    /// Backdate `updated_at` on all of an owner's rows for staleness tests.
    pub async fn age_rows(&self, owner_id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(set) = self.rows.lock().await.get_mut(&owner_id) {
            for row in set.iter_mut() {
                row.updated_at = updated_at;
            }
        }
    }
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    async fn get_for_owner(&self, owner_id: Uuid) -> Result<Vec<FollowSuggestion>> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&owner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_for_owner(&self, owner_id: Uuid, ranked: &[ScoredCandidate]) -> Result<()> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;

        let prior: HashMap<Uuid, (Option<DateTime<Utc>>, i32, DateTime<Utc>)> = rows
            .get(&owner_id)
            .map(|existing| {
                existing
                    .iter()
                    .map(|s| (s.candidate_id, (s.last_shown, s.show_count, s.created_at)))
                    .collect()
            })
            .unwrap_or_default();

        let replaced: Vec<FollowSuggestion> = ranked
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let (last_shown, show_count, created_at) = prior
                    .get(&candidate.candidate_id)
                    .copied()
                    .unwrap_or((None, 0, now));

                FollowSuggestion {
                    owner_id,
                    candidate_id: candidate.candidate_id,
                    score: candidate.score,
                    position: (idx + 1) as i32,
                    last_shown,
                    show_count,
                    created_at,
                    updated_at: now,
                }
            })
            .collect();

        rows.insert(owner_id, replaced);
        Ok(())
    }

    async fn record_exposure(
        &self,
        owner_id: Uuid,
        candidate_ids: &[Uuid],
        shown_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;

        if let Some(existing) = rows.get_mut(&owner_id) {
            for row in existing.iter_mut() {
                if candidate_ids.contains(&row.candidate_id) {
                    row.last_shown = Some(shown_at);
                    row.show_count += 1;
                }
            }
        }

        Ok(())
    }

    async fn delete_orphaned(&self) -> Result<u64> {
        let inactive = self.inactive_owners.lock().await;
        let mut rows = self.rows.lock().await;

        let mut removed = 0u64;
        rows.retain(|owner_id, set| {
            if inactive.contains(owner_id) {
                removed += set.len() as u64;
                false
            } else {
                true
            }
        });

        Ok(removed)
    }

    async fn delete_stale(&self, staleness_hours: i64, score_cutoff: f64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(staleness_hours);
        let mut rows = self.rows.lock().await;

        let mut removed = 0u64;
        for set in rows.values_mut() {
            let before = set.len();
            set.retain(|s| !(s.updated_at < cutoff && s.score <= score_cutoff));
            removed += (before - set.len()) as u64;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: Uuid, age_days: i64) -> UserRecord {
        UserRecord {
            id,
            username: format!("user-{}", &id.to_string()[..8]),
            is_public: true,
            post_count: 0,
            photo_count: 0,
            created_at: Utc::now() - Duration::days(age_days),
            deleted_at: None,
        }
    }

    fn scored(candidate_id: Uuid, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate_id,
            score,
            features: crate::domain::CandidateFeatures {
                recent_activity: 0.0,
                total_activity: 0.0,
                mutual_friends: 0,
                common_following: 0,
                common_followers: 0,
                is_public: true,
                account_age_days: 100,
            },
        }
    }

    #[tokio::test]
    async fn test_candidates_exclude_owner_related_and_deleted() {
        let store = InMemoryGraphStore::new();
        let owner = Uuid::new_v4();
        let followed = Uuid::new_v4();
        let follower = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let gone = Uuid::new_v4();

        store.add_user(user(owner, 100)).await;
        store.add_user(user(followed, 100)).await;
        store.add_user(user(follower, 100)).await;
        store.add_user(user(fresh, 100)).await;
        store.add_user(user(gone, 100)).await;
        store.mark_deleted(gone).await;
        store.add_follow(owner, followed).await;
        store.add_follow(follower, owner).await;

        let candidates = store
            .list_active_candidates(owner, true, false, 100)
            .await
            .unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|u| u.id).collect();

        assert_eq!(ids, vec![fresh]);
    }

    #[tokio::test]
    async fn test_mutual_friends_requires_both_directions() {
        let store = InMemoryGraphStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        store.add_follow(a, b).await;
        store.add_follow(b, a).await;
        store.add_follow(a, c).await;

        let mutuals = store.get_mutual_friends(a).await.unwrap();
        assert!(mutuals.contains(&b));
        assert!(!mutuals.contains(&c));
    }

    #[tokio::test]
    async fn test_replace_carries_over_bookkeeping() {
        let store = InMemorySuggestionStore::new();
        let owner = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();
        let added = Uuid::new_v4();

        store
            .replace_for_owner(owner, &[scored(kept, 0.8), scored(dropped, 0.5)])
            .await
            .unwrap();
        store
            .record_exposure(owner, &[kept], Utc::now())
            .await
            .unwrap();

        store
            .replace_for_owner(owner, &[scored(added, 0.9), scored(kept, 0.7)])
            .await
            .unwrap();

        let rows = store.get_for_owner(owner).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].candidate_id, added);
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[0].show_count, 0);
        assert_eq!(rows[1].candidate_id, kept);
        assert_eq!(rows[1].position, 2);
        assert_eq!(rows[1].show_count, 1);
        assert!(rows[1].last_shown.is_some());
    }

    #[tokio::test]
    async fn test_exposure_increments_only_selected() {
        let store = InMemorySuggestionStore::new();
        let owner = Uuid::new_v4();
        let shown = Uuid::new_v4();
        let hidden = Uuid::new_v4();

        store
            .replace_for_owner(owner, &[scored(shown, 0.8), scored(hidden, 0.6)])
            .await
            .unwrap();
        store
            .record_exposure(owner, &[shown], Utc::now())
            .await
            .unwrap();

        let rows = store.get_for_owner(owner).await.unwrap();
        assert_eq!(rows[0].show_count, 1);
        assert_eq!(rows[1].show_count, 0);
        assert!(rows[1].last_shown.is_none());
    }

    #[tokio::test]
    async fn test_delete_orphaned_only_hits_inactive_owners() {
        let store = InMemorySuggestionStore::new();
        let active = Uuid::new_v4();
        let inactive = Uuid::new_v4();

        store
            .replace_for_owner(active, &[scored(Uuid::new_v4(), 0.5)])
            .await
            .unwrap();
        store
            .replace_for_owner(inactive, &[scored(Uuid::new_v4(), 0.5)])
            .await
            .unwrap();
        store.mark_owner_inactive(inactive).await;

        let removed = store.delete_orphaned().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_for_owner(active).await.unwrap().len(), 1);
        assert!(store.get_for_owner(inactive).await.unwrap().is_empty());
    }
}
