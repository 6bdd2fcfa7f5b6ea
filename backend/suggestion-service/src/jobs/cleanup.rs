//! Suggestion cleanup background job.
//!
//! Rebuild triggers can be missed (dropped queue entries, service restarts),
//! so an hourly pass prunes what the write path left behind: rows whose
//! owner is gone, and rows that have not been refreshed for days while
//! scoring at the bottom of the range. High-scoring rows survive staleness;
//! only the cheap-to-lose tail is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info};

use crate::config::JobsConfig;
use crate::error::Result;
use crate::metrics;
use crate::repository::SuggestionStore;

/// Rows removed by one cleanup cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub rows_orphaned: u64,
    pub rows_stale: u64,
}

pub fn spawn_cleanup_job(
    store: Arc<dyn SuggestionStore>,
    config: JobsConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.cleanup_interval_sec);
        info!(
            interval_sec = config.cleanup_interval_sec,
            staleness_hours = config.cleanup_staleness_hours,
            stale_score_cutoff = config.cleanup_stale_score_cutoff,
            "Suggestion cleanup job started"
        );

        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    let cycle_start = Instant::now();

                    match run_cleanup_cycle(store.as_ref(), &config).await {
                        Ok(stats) => {
                            metrics::record_cleanup_run("success");
                            info!(
                                rows_orphaned = stats.rows_orphaned,
                                rows_stale = stats.rows_stale,
                                duration_ms = cycle_start.elapsed().as_millis() as u64,
                                "Cleanup cycle completed"
                            );
                        }
                        Err(e) => {
                            metrics::record_cleanup_run("error");
                            error!(
                                duration_ms = cycle_start.elapsed().as_millis() as u64,
                                "Cleanup cycle failed: {}",
                                e
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Suggestion cleanup job stopping");
                    break;
                }
            }
        }
    })
}

pub async fn run_cleanup_cycle(
    store: &dyn SuggestionStore,
    config: &JobsConfig,
) -> Result<CleanupStats> {
    let rows_orphaned = store.delete_orphaned().await?;
    if rows_orphaned > 0 {
        metrics::record_cleanup_rows_deleted("orphaned", rows_orphaned);
    }

    let rows_stale = store
        .delete_stale(
            config.cleanup_staleness_hours,
            config.cleanup_stale_score_cutoff,
        )
        .await?;
    if rows_stale > 0 {
        metrics::record_cleanup_rows_deleted("stale", rows_stale);
    }

    Ok(CleanupStats {
        rows_orphaned,
        rows_stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateFeatures, ScoredCandidate};
    use crate::repository::InMemorySuggestionStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn scored(score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate_id: Uuid::new_v4(),
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

    #[tokio::test]
    async fn test_cycle_removes_orphaned_rows() {
        let store = InMemorySuggestionStore::new();
        let gone = Uuid::new_v4();
        let alive = Uuid::new_v4();

        store
            .replace_for_owner(gone, &[scored(0.5), scored(0.6)])
            .await
            .unwrap();
        store.replace_for_owner(alive, &[scored(0.5)]).await.unwrap();
        store.mark_owner_inactive(gone).await;

        let stats = run_cleanup_cycle(&store, &JobsConfig::default())
            .await
            .unwrap();

        assert_eq!(stats.rows_orphaned, 2);
        assert_eq!(stats.rows_stale, 0);
        assert!(store.get_for_owner(gone).await.unwrap().is_empty());
        assert_eq!(store.get_for_owner(alive).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_removes_only_stale_low_scorers() {
        let store = InMemorySuggestionStore::new();
        let owner = Uuid::new_v4();

        // One row below the cutoff, one above; both aged past staleness.
        store
            .replace_for_owner(owner, &[scored(0.8), scored(0.2)])
            .await
            .unwrap();
        store
            .age_rows(owner, Utc::now() - ChronoDuration::hours(100))
            .await;

        let stats = run_cleanup_cycle(&store, &JobsConfig::default())
            .await
            .unwrap();

        assert_eq!(stats.rows_orphaned, 0);
        assert_eq!(stats.rows_stale, 1);

        let remaining = store.get_for_owner(owner).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].score, 0.8);
    }

    #[tokio::test]
    async fn test_cycle_keeps_fresh_low_scorers() {
        let store = InMemorySuggestionStore::new();
        let owner = Uuid::new_v4();

        store.replace_for_owner(owner, &[scored(0.2)]).await.unwrap();

        let stats = run_cleanup_cycle(&store, &JobsConfig::default())
            .await
            .unwrap();

        assert_eq!(stats.rows_stale, 0);
        assert_eq!(store.get_for_owner(owner).await.unwrap().len(), 1);
    }
}
