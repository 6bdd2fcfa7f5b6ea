//! Suggestion engine.
//!
//! `SuggestionEngine` is the read/write surface the handlers talk to. It
//! layers the display cache over the persisted top-K, falls back to an
//! inline bounded rebuild on a user's first view, and hands recompute
//! triggers to the background scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::SuggestionCache;
use crate::config::EngineConfig;
use crate::domain::{
    CachedDisplaySet, DisplayEntry, RebuildTrigger, RelationshipAction, RelationshipKind,
};
use crate::error::Result;
use crate::jobs::RebuildScheduler;
use crate::metrics;
use crate::repository::{GraphStore, SuggestionStore};

pub mod builder;
pub mod features;
pub mod rotation;
pub mod scoring;

pub use builder::{RebuildOutcome, TopKBuilder};
pub use rotation::RotationSelector;

pub struct SuggestionEngine {
    suggestions: Arc<dyn SuggestionStore>,
    cache: Option<Arc<SuggestionCache>>,
    builder: Arc<TopKBuilder>,
    rotation: RotationSelector,
    scheduler: RebuildScheduler,
    config: EngineConfig,
}

impl SuggestionEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        suggestions: Arc<dyn SuggestionStore>,
        cache: Option<Arc<SuggestionCache>>,
        scheduler: RebuildScheduler,
        config: EngineConfig,
    ) -> Self {
        let builder = match cache.clone() {
            Some(cache) => Arc::new(TopKBuilder::with_cache(
                graph.clone(),
                suggestions.clone(),
                cache,
                config.clone(),
            )),
            None => Arc::new(TopKBuilder::new(
                graph.clone(),
                suggestions.clone(),
                config.clone(),
            )),
        };
        let rotation = RotationSelector::new(config.rotation.clone());

        Self {
            suggestions,
            cache,
            builder,
            rotation,
            scheduler,
            config,
        }
    }

    /// Builder shared with the background workers.
    pub fn builder(&self) -> Arc<TopKBuilder> {
        self.builder.clone()
    }

    /// The display subset for one owner.
    ///
    /// Cache hit returns the pinned subset for the TTL window. On a miss
    /// the persisted rows are rotation-selected, exposure is recorded for
    /// exactly the returned rows, and the subset is cached. An owner with
    /// nothing persisted gets one bounded inline rebuild attempt; an empty
    /// list is a valid response, never an error.
    pub async fn get_suggestions(
        &self,
        owner_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<DisplayEntry>> {
        let want = limit
            .unwrap_or(self.config.display_count)
            .min(self.config.display_count);
        if want == 0 {
            return Ok(Vec::new());
        }

        if let Some(cache) = self.cache.as_ref() {
            match cache.get_display_set(owner_id).await {
                Ok(Some(cached)) => {
                    let mut entries = cached.suggestions;
                    entries.truncate(want);
                    return Ok(entries);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(owner_id = %owner_id, "Display cache read failed, using database: {}", e);
                }
            }
        }

        let mut rows = self.suggestions.get_for_owner(owner_id).await?;
        if rows.is_empty() {
            self.first_view_rebuild(owner_id).await;
            rows = self.suggestions.get_for_owner(owner_id).await?;
        }

        let selected = self
            .rotation
            .select_display_set(&rows, want, Utc::now());
        let entries: Vec<DisplayEntry> = selected
            .iter()
            .map(|row| DisplayEntry {
                user_id: row.candidate_id,
                score: row.score,
            })
            .collect();

        if !entries.is_empty() {
            let shown_ids: Vec<Uuid> = entries.iter().map(|e| e.user_id).collect();
            if let Err(e) = self
                .suggestions
                .record_exposure(owner_id, &shown_ids, Utc::now())
                .await
            {
                warn!(owner_id = %owner_id, "Failed to record suggestion exposure: {}", e);
            }

            if let Some(cache) = self.cache.as_ref() {
                let set = CachedDisplaySet {
                    suggestions: entries.clone(),
                    cached_at: Utc::now(),
                };
                if let Err(e) = cache.set_display_set(owner_id, &set).await {
                    warn!(owner_id = %owner_id, "Display cache write failed: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Forced inline rebuild, bypassing dedup. Runs even while a background
    /// job for the owner is queued or running; the queued job is superseded.
    pub async fn refresh(&self, owner_id: Uuid) -> Result<RebuildOutcome> {
        let tracker = self.scheduler.tracker();
        tracker.force_begin(owner_id);
        let start = Instant::now();

        let result = self.builder.rebuild(owner_id).await;
        tracker.finish(owner_id);

        match &result {
            Ok(outcome) => {
                let status = if outcome.skipped { "skipped" } else { "completed" };
                metrics::record_rebuild(RebuildTrigger::Manual.as_str(), status);
                metrics::observe_rebuild_duration(RebuildTrigger::Manual.as_str(), start.elapsed());
                info!(
                    owner_id = %owner_id,
                    persisted = outcome.persisted,
                    "Forced suggestion refresh complete"
                );
            }
            Err(e) => {
                metrics::record_rebuild(RebuildTrigger::Manual.as_str(), "failed");
                warn!(owner_id = %owner_id, "Forced suggestion refresh failed: {}", e);
            }
        }

        result
    }

    /// Scheduler entry point for relationship-change triggers.
    pub async fn on_relationship_changed(
        &self,
        from_user: Uuid,
        to_user: Uuid,
        kind: RelationshipKind,
        action: RelationshipAction,
    ) -> Result<()> {
        self.scheduler
            .on_relationship_changed(from_user, to_user, kind, action)
            .await
    }

    /// Best-effort bounded rebuild for an owner with nothing persisted.
    ///
    /// The rebuild future is dropped on timeout (the open transaction rolls
    /// back), and a background job takes over so a later view finds data.
    async fn first_view_rebuild(&self, owner_id: Uuid) {
        let trigger = RebuildTrigger::FirstView;
        let tracker = self.scheduler.tracker();
        tracker.force_begin(owner_id);
        let start = Instant::now();

        let budget = Duration::from_millis(self.config.first_view_timeout_ms);
        match timeout(budget, self.builder.rebuild(owner_id)).await {
            Ok(Ok(outcome)) => {
                tracker.finish(owner_id);
                let status = if outcome.skipped { "skipped" } else { "completed" };
                metrics::record_rebuild(trigger.as_str(), status);
                metrics::observe_rebuild_duration(trigger.as_str(), start.elapsed());
                debug!(
                    owner_id = %owner_id,
                    persisted = outcome.persisted,
                    "First-view rebuild complete"
                );
            }
            Ok(Err(e)) => {
                tracker.finish(owner_id);
                metrics::record_rebuild(trigger.as_str(), "failed");
                warn!(
                    owner_id = %owner_id,
                    "First-view rebuild failed, queueing background rebuild: {}",
                    e
                );
                self.scheduler.schedule(owner_id, trigger);
            }
            Err(_) => {
                tracker.finish(owner_id);
                metrics::record_rebuild(trigger.as_str(), "timeout");
                warn!(
                    owner_id = %owner_id,
                    timeout_ms = self.config.first_view_timeout_ms,
                    "First-view rebuild timed out, queueing background rebuild"
                );
                self.scheduler.schedule(owner_id, trigger);
            }
        }
    }
}
