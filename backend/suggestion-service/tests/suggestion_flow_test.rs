//! Integration Tests: Suggestion Engine
//!
//! Exercises the full suggestion pipeline over the in-memory stores.
//!
//! Coverage:
//! - First view rebuilds inline, persists top-K, serves a display subset
//! - Display bookkeeping survives rebuilds
//! - Exposure is recorded only for entries actually returned
//! - Rotation prefers candidates the owner has not seen yet
//! - Duplicate rebuild triggers collapse to one queued job
//! - Workers retry transient store failures before completing
//! - Owners with no candidates get an empty list, not an error
//! - Forced refresh replaces the persisted set
//! - Cleanup removes orphaned and stale low-score rows

use chrono::{DateTime, Duration, Utc};
use mockall::mock;
use mockall::Sequence;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use suggestion_service::config::{EngineConfig, JobsConfig};
use suggestion_service::domain::{
    ActivityKind, CandidateFeatures, FollowDirection, RebuildTrigger, ScoredCandidate, UserRecord,
};
use suggestion_service::jobs::cleanup::run_cleanup_cycle;
use suggestion_service::jobs::{
    create_rebuild_queue, spawn_rebuild_workers, RebuildScheduler, RebuildTracker,
};
use suggestion_service::repository::{
    GraphStore, InMemoryGraphStore, InMemorySuggestionStore, SuggestionStore,
};
use suggestion_service::services::{SuggestionEngine, TopKBuilder};
use suggestion_service::{AppError, Result};

mock! {
    pub Graph {}

    #[async_trait::async_trait]
    impl GraphStore for Graph {
        async fn list_active_candidates(
            &self,
            owner_id: Uuid,
            exclude_related: bool,
            exclude_pending: bool,
            limit: i64,
        ) -> Result<Vec<UserRecord>>;
        async fn get_user(&self, user_id: Uuid) -> Result<Option<UserRecord>>;
        async fn get_activity_window(
            &self,
            user_id: Uuid,
            days: i64,
        ) -> Result<Vec<(DateTime<Utc>, ActivityKind)>>;
        async fn get_follow_edges(
            &self,
            user_id: Uuid,
            direction: FollowDirection,
        ) -> Result<HashSet<Uuid>>;
        async fn get_mutual_friends(&self, user_id: Uuid) -> Result<HashSet<Uuid>>;
        async fn list_user_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>>;
    }
}

fn member(id: Uuid, age_days: i64) -> UserRecord {
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
        features: CandidateFeatures {
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

/// Seed an owner plus `candidates` quiet candidate accounts.
async fn seeded_graph(owner: Uuid, candidates: usize) -> (Arc<InMemoryGraphStore>, Vec<Uuid>) {
    let graph = Arc::new(InMemoryGraphStore::new());
    graph.add_user(member(owner, 100)).await;

    let mut ids = Vec::with_capacity(candidates);
    for _ in 0..candidates {
        let id = Uuid::new_v4();
        graph.add_user(member(id, 100)).await;
        ids.push(id);
    }

    (graph, ids)
}

fn engine_over(
    graph: Arc<InMemoryGraphStore>,
    store: Arc<InMemorySuggestionStore>,
) -> SuggestionEngine {
    let (sender, _receiver) = create_rebuild_queue(16);
    let scheduler = RebuildScheduler::new(RebuildTracker::new(), sender, graph.clone(), 20);
    SuggestionEngine::new(graph, store, None, scheduler, EngineConfig::default())
}

#[tokio::test]
async fn test_first_view_persists_top_k_and_serves_subset() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 40).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph, store.clone());

    let entries = engine.get_suggestions(owner, None).await.unwrap();
    assert_eq!(entries.len(), 4);

    let rows = store.get_for_owner(owner).await.unwrap();
    assert_eq!(rows.len(), 30, "persisted set is capped at top-K");

    let positions: Vec<i32> = rows.iter().map(|r| r.position).collect();
    assert_eq!(positions, (1..=30).collect::<Vec<i32>>());

    for row in &rows {
        assert!(row.score >= 0.2 && row.score <= 0.9);
    }

    let persisted: HashSet<Uuid> = rows.iter().map(|r| r.candidate_id).collect();
    for entry in &entries {
        assert!(persisted.contains(&entry.user_id));
    }
}

#[tokio::test]
async fn test_bookkeeping_survives_rebuild() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 6).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph, store.clone());

    let shown: HashSet<Uuid> = engine
        .get_suggestions(owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.user_id)
        .collect();
    assert_eq!(shown.len(), 4);

    engine.refresh(owner).await.unwrap();

    let rows = store.get_for_owner(owner).await.unwrap();
    assert_eq!(rows.len(), 6);
    for row in rows {
        if shown.contains(&row.candidate_id) {
            assert_eq!(row.show_count, 1);
            assert!(row.last_shown.is_some());
        } else {
            assert_eq!(row.show_count, 0);
            assert!(row.last_shown.is_none());
        }
    }
}

#[tokio::test]
async fn test_exposure_recorded_only_for_returned_entries() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 10).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph, store.clone());

    let returned: HashSet<Uuid> = engine
        .get_suggestions(owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.user_id)
        .collect();

    let rows = store.get_for_owner(owner).await.unwrap();
    let exposed: HashSet<Uuid> = rows
        .iter()
        .filter(|r| r.show_count > 0)
        .map(|r| r.candidate_id)
        .collect();

    assert_eq!(exposed, returned);
    assert_eq!(rows.iter().filter(|r| r.show_count == 0).count(), 6);
}

#[tokio::test]
async fn test_rotation_prefers_unseen_candidates() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 12).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph, store.clone());

    let first: HashSet<Uuid> = engine
        .get_suggestions(owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.user_id)
        .collect();
    let second: HashSet<Uuid> = engine
        .get_suggestions(owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.user_id)
        .collect();

    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    assert!(
        first.is_disjoint(&second),
        "freshly shown candidates should rotate out while unseen ones remain"
    );
}

#[tokio::test]
async fn test_duplicate_triggers_collapse_to_one_job() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 2).await;
    let store = Arc::new(InMemorySuggestionStore::new());

    let tracker = RebuildTracker::new();
    let (sender, receiver) = create_rebuild_queue(8);
    let scheduler = RebuildScheduler::new(tracker.clone(), sender, graph.clone(), 20);

    assert!(scheduler.schedule(owner, RebuildTrigger::Periodic));
    assert!(
        !scheduler.schedule(owner, RebuildTrigger::RelationshipChange),
        "second trigger while queued must collapse"
    );

    let builder = Arc::new(TopKBuilder::new(
        graph.clone(),
        store.clone(),
        EngineConfig::default(),
    ));
    let handles = spawn_rebuild_workers(builder, tracker.clone(), receiver, &JobsConfig::default());

    let mut drained = false;
    for _ in 0..100 {
        if tracker.size() == 0 && !store.get_for_owner(owner).await.unwrap().is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(drained, "worker should process the single queued job");
    assert_eq!(store.get_for_owner(owner).await.unwrap().len(), 2);

    // Slot reopens once the job finished.
    assert!(scheduler.schedule(owner, RebuildTrigger::Periodic));

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_worker_retries_transient_failure() {
    let owner = Uuid::new_v4();
    let candidate = Uuid::new_v4();

    let mut graph = MockGraph::new();
    let mut seq = Sequence::new();
    graph
        .expect_get_user()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(AppError::Database(sqlx::Error::PoolTimedOut)));
    graph
        .expect_get_user()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|id| Ok(Some(member(id, 100))));
    graph
        .expect_list_active_candidates()
        .returning(move |_, _, _, _| Ok(vec![member(candidate, 100)]));
    graph
        .expect_get_follow_edges()
        .returning(|_, _| Ok(HashSet::new()));
    graph
        .expect_get_mutual_friends()
        .returning(|_| Ok(HashSet::new()));
    graph.expect_get_activity_window().returning(|_, _| Ok(vec![]));

    let graph: Arc<dyn GraphStore> = Arc::new(graph);
    let store = Arc::new(InMemorySuggestionStore::new());

    let tracker = RebuildTracker::new();
    let (sender, receiver) = create_rebuild_queue(4);
    let scheduler = RebuildScheduler::new(tracker.clone(), sender, graph.clone(), 20);
    assert!(scheduler.schedule(owner, RebuildTrigger::Periodic));

    let mut jobs_config = JobsConfig::default();
    jobs_config.retry_backoff_ms = 10;
    let builder = Arc::new(TopKBuilder::new(graph, store.clone(), EngineConfig::default()));
    let handles = spawn_rebuild_workers(builder, tracker.clone(), receiver, &jobs_config);

    let mut persisted = false;
    for _ in 0..100 {
        if store.get_for_owner(owner).await.unwrap().len() == 1 {
            persisted = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(persisted, "rebuild should succeed on the second attempt");
    assert_eq!(
        store.get_for_owner(owner).await.unwrap()[0].candidate_id,
        candidate
    );

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_owner_without_candidates_gets_empty_list() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 0).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph, store.clone());

    let entries = engine.get_suggestions(owner, None).await.unwrap();
    assert!(entries.is_empty());
    assert!(store.get_for_owner(owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_forced_refresh_replaces_persisted_set() {
    let owner = Uuid::new_v4();
    let (graph, _) = seeded_graph(owner, 3).await;
    let store = Arc::new(InMemorySuggestionStore::new());
    let engine = engine_over(graph.clone(), store.clone());

    assert_eq!(engine.get_suggestions(owner, None).await.unwrap().len(), 3);

    // A new prolific account appears.
    let strong = Uuid::new_v4();
    let mut record = member(strong, 100);
    record.post_count = 5;
    graph.add_user(record).await;
    for _ in 0..5 {
        graph
            .add_activity(strong, Utc::now() - Duration::hours(2), ActivityKind::Post)
            .await;
    }

    let outcome = engine.refresh(owner).await.unwrap();
    assert_eq!(outcome.considered, 4);
    assert_eq!(outcome.persisted, 4);

    let rows = store.get_for_owner(owner).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].candidate_id, strong);
    assert!((rows[0].score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_cleanup_removes_orphaned_and_stale_rows() {
    let store = Arc::new(InMemorySuggestionStore::new());
    let gone_owner = Uuid::new_v4();
    let live_owner = Uuid::new_v4();

    store
        .replace_for_owner(
            gone_owner,
            &[scored(Uuid::new_v4(), 0.5), scored(Uuid::new_v4(), 0.4)],
        )
        .await
        .unwrap();
    let keeper = Uuid::new_v4();
    store
        .replace_for_owner(
            live_owner,
            &[scored(keeper, 0.8), scored(Uuid::new_v4(), 0.2)],
        )
        .await
        .unwrap();

    store.mark_owner_inactive(gone_owner).await;
    store
        .age_rows(live_owner, Utc::now() - Duration::hours(100))
        .await;

    let stats = run_cleanup_cycle(store.as_ref(), &JobsConfig::default())
        .await
        .unwrap();
    assert_eq!(stats.rows_orphaned, 2);
    assert_eq!(stats.rows_stale, 1);

    assert!(store.get_for_owner(gone_owner).await.unwrap().is_empty());
    let remaining = store.get_for_owner(live_owner).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].candidate_id, keeper);
}
