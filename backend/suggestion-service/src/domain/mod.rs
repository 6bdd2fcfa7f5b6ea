use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user row as replicated from the identity/social services.
///
/// Active means `deleted_at IS NULL`. Lifetime counters may arrive negative
/// from upstream sync glitches; consumers clamp at read time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub is_public: bool,
    pub post_count: i32,
    pub photo_count: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Kind of a content item counted as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Post,
    Photo,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Post => "post",
            ActivityKind::Photo => "photo",
        }
    }
}

/// Direction of a follow-edge query relative to the subject user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDirection {
    /// Users the subject follows
    Outgoing,
    /// Users following the subject
    Incoming,
}

/// Kind of relationship edge reported by the social service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Follow,
    CloseFriend,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Follow => "follow",
            RelationshipKind::CloseFriend => "close_friend",
        }
    }
}

/// What happened to a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipAction {
    Created,
    Removed,
}

/// Status of a follow request between a private-account pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// What caused a rebuild to be scheduled. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTrigger {
    Periodic,
    RelationshipChange,
    Manual,
    FirstView,
}

impl RebuildTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildTrigger::Periodic => "periodic",
            RebuildTrigger::RelationshipChange => "relationship_change",
            RebuildTrigger::Manual => "manual",
            RebuildTrigger::FirstView => "first_view",
        }
    }
}

/// One persisted suggestion row, owned by the engine.
///
/// Positions are dense 1..N per owner, ordered by score desc with
/// candidate-id tie-break. `last_shown`/`show_count` survive rebuilds for
/// candidates that stay in the set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowSuggestion {
    pub owner_id: Uuid,
    pub candidate_id: Uuid,
    pub score: f64,
    pub position: i32,
    pub last_shown: Option<DateTime<Utc>>,
    pub show_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Feature tuple extracted per candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFeatures {
    /// Recency-weighted activity over the 30-day window
    pub recent_activity: f64,
    /// Lifetime activity: 2x posts + photos
    pub total_activity: f64,
    pub mutual_friends: u32,
    pub common_following: u32,
    pub common_followers: u32,
    pub is_public: bool,
    pub account_age_days: i64,
}

/// A candidate with its computed score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate_id: Uuid,
    pub score: f64,
    pub features: CandidateFeatures,
}

/// One entry of the served display subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayEntry {
    pub user_id: Uuid,
    pub score: f64,
}

/// Redis-cached display subset for one owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDisplaySet {
    pub suggestions: Vec<DisplayEntry>,
    pub cached_at: DateTime<Utc>,
}
