//! Per-owner rebuild deduplication.
//!
//! Concurrent triggers for one owner (relationship churn, periodic sweep,
//! first view) must collapse to a single queued rebuild. State lives in a
//! `DashMap` keyed by owner; transitions go through the entry API so two
//! racing triggers can never both win.
//!
//! States: absent = idle, `Queued` = a job sits in the queue, `Running` =
//! a worker is executing. Lifecycle: `try_enqueue` (idle -> queued),
//! `begin` (queued -> running), `finish` (-> idle). `force_begin` claims
//! the slot unconditionally for non-deduped manual refreshes; a queued job
//! that lost its slot fails `begin` and is skipped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
}

#[derive(Clone)]
pub struct RebuildTracker {
    states: Arc<DashMap<Uuid, JobState>>,
}

impl RebuildTracker {
    pub fn new() -> Self {
        Self {
            states: Arc::new(DashMap::new()),
        }
    }

    /// Claim the queued slot for an owner. Returns false when a rebuild is
    /// already queued or running; the caller must not enqueue.
    pub fn try_enqueue(&self, owner_id: Uuid) -> bool {
        match self.states.entry(owner_id) {
            Entry::Vacant(slot) => {
                slot.insert(JobState::Queued);
                true
            }
            Entry::Occupied(_) => {
                debug!(owner_id = %owner_id, "Rebuild already pending, collapsing trigger");
                metrics::record_rebuild_collapsed();
                false
            }
        }
    }

    /// Move a dequeued job to running. Returns false when the job was
    /// superseded (slot no longer in `Queued`); the worker must skip it.
    pub fn begin(&self, owner_id: Uuid) -> bool {
        match self.states.entry(owner_id) {
            Entry::Occupied(mut slot) if *slot.get() == JobState::Queued => {
                slot.insert(JobState::Running);
                true
            }
            _ => false,
        }
    }

    /// Claim the slot unconditionally. Used by forced refreshes that must
    /// run even while a background rebuild is queued or running.
    pub fn force_begin(&self, owner_id: Uuid) {
        self.states.insert(owner_id, JobState::Running);
    }

    /// Return the owner to idle. Safe to call for untracked owners.
    pub fn finish(&self, owner_id: Uuid) {
        self.states.remove(&owner_id);
    }

    /// Number of owners currently queued or running (for monitoring).
    pub fn size(&self) -> usize {
        self.states.len()
    }
}

impl Default for RebuildTracker {
    fn default() -> Self {
        Self::new()
    }
}
