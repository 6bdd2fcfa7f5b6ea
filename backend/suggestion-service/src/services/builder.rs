//! Top-K rebuild pipeline.
//!
//! A rebuild is an idempotent full replace of one owner's persisted
//! suggestion set: enumerate candidates, extract features, score, rank,
//! persist the top rows, drop the display cache. A missing or deleted
//! owner makes the rebuild a no-op that leaves existing rows untouched.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::SuggestionCache;
use crate::config::EngineConfig;
use crate::domain::ScoredCandidate;
use crate::error::Result;
use crate::repository::{GraphStore, SuggestionStore};
use crate::services::features::FeatureExtractor;
use crate::services::scoring::score_candidate;

/// Counts from one rebuild, for logs and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub considered: usize,
    pub persisted: usize,
    pub skipped: bool,
}

impl RebuildOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct TopKBuilder {
    graph: Arc<dyn GraphStore>,
    suggestions: Arc<dyn SuggestionStore>,
    extractor: FeatureExtractor,
    cache: Option<Arc<SuggestionCache>>,
    config: EngineConfig,
}

impl TopKBuilder {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        suggestions: Arc<dyn SuggestionStore>,
        config: EngineConfig,
    ) -> Self {
        let extractor = FeatureExtractor::new(graph.clone(), config.feature_concurrency);
        Self {
            graph,
            suggestions,
            extractor,
            cache: None,
            config,
        }
    }

    pub fn with_cache(
        graph: Arc<dyn GraphStore>,
        suggestions: Arc<dyn SuggestionStore>,
        cache: Arc<SuggestionCache>,
        config: EngineConfig,
    ) -> Self {
        let mut builder = Self::new(graph, suggestions, config);
        builder.cache = Some(cache);
        builder
    }

    /// Recompute and replace the owner's persisted suggestion set.
    ///
    /// Fewer candidates than `top_k` (including zero) is a valid outcome;
    /// the persisted set just shrinks.
    pub async fn rebuild(&self, owner_id: Uuid) -> Result<RebuildOutcome> {
        let owner = match self.graph.get_user(owner_id).await? {
            Some(user) if user.is_active() => user,
            _ => {
                debug!(owner_id = %owner_id, "Skipping rebuild for missing or deleted owner");
                return Ok(RebuildOutcome::skipped());
            }
        };

        let candidates = self
            .graph
            .list_active_candidates(
                owner_id,
                true,
                self.config.exclude_pending_requests,
                self.config.candidate_limit,
            )
            .await?;
        let considered = candidates.len();

        let ctx = self.extractor.owner_context(owner_id).await?;
        let featured = self
            .extractor
            .extract_batch(owner_id, &ctx, &candidates)
            .await?;

        let mut ranked: Vec<ScoredCandidate> = featured
            .into_iter()
            .map(|(candidate_id, features)| {
                let score = score_candidate(&self.config.scoring, &features);
                ScoredCandidate {
                    candidate_id,
                    score,
                    features,
                }
            })
            .collect();

        // Score descending, equal scores ordered by candidate id so that
        // repeated rebuilds over unchanged data produce identical positions.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        ranked.truncate(self.config.top_k);

        self.suggestions.replace_for_owner(owner_id, &ranked).await?;

        if let Some(cache) = self.cache.as_ref() {
            if let Err(e) = cache.invalidate(owner_id).await {
                warn!(owner_id = %owner_id, "Display cache invalidation failed: {}", e);
            }
        }

        info!(
            owner_id = %owner.id,
            considered,
            persisted = ranked.len(),
            "Rebuilt follow suggestions"
        );

        Ok(RebuildOutcome {
            considered,
            persisted: ranked.len(),
            skipped: false,
        })
    }
}
