//! Feature extraction for scoring.
//!
//! The owner-side graph reads (edges, mutual set) are fetched once per
//! rebuild and shared across every candidate; candidate-side reads run with
//! bounded concurrency.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ActivityKind, CandidateFeatures, FollowDirection, UserRecord};
use crate::error::Result;
use crate::repository::GraphStore;

/// Activity older than this contributes nothing to `recent_activity`.
pub const ACTIVITY_WINDOW_DAYS: i64 = 30;

/// Owner-side graph context, fetched once per rebuild.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    pub following: HashSet<Uuid>,
    pub followers: HashSet<Uuid>,
    pub mutual_friends: HashSet<Uuid>,
}

pub struct FeatureExtractor {
    graph: Arc<dyn GraphStore>,
    concurrency: usize,
}

impl FeatureExtractor {
    pub fn new(graph: Arc<dyn GraphStore>, concurrency: usize) -> Self {
        Self {
            graph,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn owner_context(&self, owner_id: Uuid) -> Result<OwnerContext> {
        let following = self
            .graph
            .get_follow_edges(owner_id, FollowDirection::Outgoing)
            .await?;
        let followers = self
            .graph
            .get_follow_edges(owner_id, FollowDirection::Incoming)
            .await?;
        let mutual_friends = self.graph.get_mutual_friends(owner_id).await?;

        debug!(
            owner_id = %owner_id,
            following = following.len(),
            followers = followers.len(),
            mutual_friends = mutual_friends.len(),
            "Fetched owner graph context"
        );

        Ok(OwnerContext {
            following,
            followers,
            mutual_friends,
        })
    }

    /// Features for every candidate, in input order.
    pub async fn extract_batch(
        &self,
        owner_id: Uuid,
        ctx: &OwnerContext,
        candidates: &[UserRecord],
    ) -> Result<Vec<(Uuid, CandidateFeatures)>> {
        // Boxing erases the stream combinator types so callers can prove
        // the rebuild future `Send` (rust-lang/rust#102211).
        let extracted: Vec<Result<(Uuid, CandidateFeatures)>> = stream::iter(candidates)
            .map(|candidate| async move {
                let features = self.extract_one(owner_id, ctx, candidate).await?;
                Ok((candidate.id, features))
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        extracted.into_iter().collect()
    }

    pub async fn extract_one(
        &self,
        owner_id: Uuid,
        ctx: &OwnerContext,
        candidate: &UserRecord,
    ) -> Result<CandidateFeatures> {
        let now = Utc::now();

        let activity = self
            .graph
            .get_activity_window(candidate.id, ACTIVITY_WINDOW_DAYS)
            .await?;
        let candidate_following = self
            .graph
            .get_follow_edges(candidate.id, FollowDirection::Outgoing)
            .await?;
        let candidate_followers = self
            .graph
            .get_follow_edges(candidate.id, FollowDirection::Incoming)
            .await?;
        let candidate_mutuals = self.graph.get_mutual_friends(candidate.id).await?;

        let excluded = [owner_id, candidate.id];
        let common_following = ctx
            .following
            .intersection(&candidate_following)
            .filter(|id| !excluded.contains(id))
            .count() as u32;
        let common_followers = ctx
            .followers
            .intersection(&candidate_followers)
            .filter(|id| !excluded.contains(id))
            .count() as u32;
        let mutual_friends = ctx
            .mutual_friends
            .intersection(&candidate_mutuals)
            .filter(|id| !excluded.contains(id))
            .count() as u32;

        Ok(CandidateFeatures {
            recent_activity: recent_activity(&activity, now),
            total_activity: total_activity(candidate),
            mutual_friends,
            common_following,
            common_followers,
            is_public: candidate.is_public,
            account_age_days: candidate.account_age_days(now),
        })
    }
}

/// Lifetime activity with posts counting double. Upstream counters can
/// arrive negative; clamp before use.
fn total_activity(user: &UserRecord) -> f64 {
    2.0 * user.post_count.max(0) as f64 + user.photo_count.max(0) as f64
}

/// Recency-decayed activity over the window.
///
/// Weight by age bucket, posts count double photos within a bucket.
fn recent_activity(items: &[(DateTime<Utc>, ActivityKind)], now: DateTime<Utc>) -> f64 {
    items
        .iter()
        .map(|(created_at, kind)| {
            let weight = bucket_weight(now - *created_at);
            match kind {
                ActivityKind::Post => weight * 2.0,
                ActivityKind::Photo => weight,
            }
        })
        .sum()
}

fn bucket_weight(age: Duration) -> f64 {
    if age <= Duration::days(1) {
        5.0
    } else if age <= Duration::days(7) {
        3.0
    } else if age <= Duration::days(14) {
        2.0
    } else if age <= Duration::days(21) {
        1.5
    } else if age <= Duration::days(ACTIVITY_WINDOW_DAYS) {
        1.0
    } else {
        0.0
    }
}
