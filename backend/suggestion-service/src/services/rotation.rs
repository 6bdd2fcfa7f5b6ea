//! Display rotation over the persisted top-K.
//!
//! Every view request picks a small subset of the owner's persisted
//! suggestions. Raw score is demoted by how recently and how often a row
//! has already been shown, so strong candidates rotate instead of
//! monopolizing the display slots.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;

use crate::config::RotationParams;
use crate::domain::FollowSuggestion;

pub struct RotationSelector {
    params: RotationParams,
}

impl RotationSelector {
    pub fn new(params: RotationParams) -> Self {
        Self { params }
    }

    /// Display priority of one persisted row at `now`.
    pub fn priority(&self, row: &FollowSuggestion, now: DateTime<Utc>) -> f64 {
        row.score
            - self.recency_penalty(row.last_shown, now)
            - self.frequency_penalty(row.show_count)
    }

    /// Linear fade from `recency_penalty_max` right after a show down to
    /// zero once `recency_window_hours` have passed. Never-shown rows pay
    /// nothing.
    fn recency_penalty(&self, last_shown: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(shown_at) = last_shown else {
            return 0.0;
        };
        let window = self.params.recency_window_hours as f64;
        if window <= 0.0 {
            return 0.0;
        }
        let hours = (now - shown_at).num_seconds() as f64 / 3600.0;
        if hours >= window {
            return 0.0;
        }
        self.params.recency_penalty_max * ((window - hours) / window).clamp(0.0, 1.0)
    }

    /// Grows with show_count and saturates at `frequency_saturation` shows.
    fn frequency_penalty(&self, show_count: i32) -> f64 {
        let saturation = self.params.frequency_saturation.max(1) as f64;
        let shows = (show_count.max(0) as f64).min(saturation);
        self.params.frequency_penalty_max * shows / saturation
    }

    /// Pick up to `want` rows to display.
    ///
    /// Rows at or above `priority_floor` form the primary pool; when the
    /// pool runs short the below-floor rows fill the remaining slots in
    /// priority order. The floor pushes pathological priorities to the
    /// back of the line without ever hiding them. Equal-priority runs are
    /// shuffled so ties rotate across calls instead of starving.
    pub fn select_display_set(
        &self,
        rows: &[FollowSuggestion],
        want: usize,
        now: DateTime<Utc>,
    ) -> Vec<FollowSuggestion> {
        if rows.is_empty() || want == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, FollowSuggestion)> = rows
            .iter()
            .map(|row| (self.priority(row, now), row.clone()))
            .collect();

        // Shuffle before the stable sort; equal priorities keep the
        // shuffled order.
        scored.shuffle(&mut rand::thread_rng());
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let floor = self.params.priority_floor;
        let (pool, backfill): (Vec<_>, Vec<_>) =
            scored.into_iter().partition(|(priority, _)| *priority >= floor);

        pool.into_iter()
            .chain(backfill)
            .take(want)
            .map(|(_, row)| row)
            .collect()
    }
}
