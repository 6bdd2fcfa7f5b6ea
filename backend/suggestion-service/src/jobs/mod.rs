//! Background rebuild scheduling.
//!
//! Triggers from relationship churn, first views, and the periodic sweep
//! funnel into one bounded queue. A small worker pool drains it, with the
//! tracker collapsing concurrent triggers per owner to a single job.
//!
//! Queue-full is not an error condition: the trigger is dropped with a
//! warning and the owner stays idle, so the next periodic sweep catches
//! the owner up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::domain::{RebuildTrigger, RelationshipAction, RelationshipKind};
use crate::error::Result;
use crate::metrics;
use crate::repository::GraphStore;
use crate::services::builder::TopKBuilder;

pub mod cleanup;
pub mod dedup;

pub use dedup::{JobState, RebuildTracker};

/// Users fetched per page during the periodic sweep.
const SWEEP_BATCH_SIZE: i64 = 500;

/// One queued rebuild.
#[derive(Debug, Clone)]
pub struct RebuildJob {
    pub owner_id: Uuid,
    pub trigger: RebuildTrigger,
    pub attempt: u32,
}

pub type JobSender = mpsc::Sender<RebuildJob>;
pub type JobReceiver = mpsc::Receiver<RebuildJob>;

/// Receiver shared by the worker pool; each worker locks it only for the
/// duration of one `recv`.
pub type SharedJobReceiver = Arc<Mutex<JobReceiver>>;

pub fn create_rebuild_queue(capacity: usize) -> (JobSender, JobReceiver) {
    mpsc::channel(capacity)
}

/// Producer side of the rebuild pipeline: deduped enqueue plus the
/// relationship-change fan-out.
#[derive(Clone)]
pub struct RebuildScheduler {
    tracker: RebuildTracker,
    sender: JobSender,
    graph: Arc<dyn GraphStore>,
    fanout_limit: usize,
}

impl RebuildScheduler {
    pub fn new(
        tracker: RebuildTracker,
        sender: JobSender,
        graph: Arc<dyn GraphStore>,
        fanout_limit: usize,
    ) -> Self {
        Self {
            tracker,
            sender,
            graph,
            fanout_limit,
        }
    }

    pub fn tracker(&self) -> &RebuildTracker {
        &self.tracker
    }

    /// Enqueue a rebuild unless one is already queued or running for the
    /// owner. Returns true when a new job entered the queue.
    pub fn schedule(&self, owner_id: Uuid, trigger: RebuildTrigger) -> bool {
        if !self.tracker.try_enqueue(owner_id) {
            return false;
        }

        let job = RebuildJob {
            owner_id,
            trigger,
            attempt: 0,
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(owner_id = %owner_id, trigger = trigger.as_str(), "Enqueued rebuild");
                true
            }
            Err(e) => {
                // Release the slot so the periodic sweep can catch the
                // owner up later.
                self.tracker.finish(owner_id);
                metrics::record_queue_dropped();
                warn!(owner_id = %owner_id, "Rebuild queue full, dropping trigger: {}", e);
                false
            }
        }
    }

    /// React to a follow or close-friend edge change: both endpoints get a
    /// rebuild, plus the mutual friends the pair shares, capped at
    /// `fanout_limit` so one change never cascades across the whole graph.
    pub async fn on_relationship_changed(
        &self,
        from_user: Uuid,
        to_user: Uuid,
        kind: RelationshipKind,
        action: RelationshipAction,
    ) -> Result<()> {
        debug!(
            from_user = %from_user,
            to_user = %to_user,
            kind = kind.as_str(),
            action = ?action,
            "Relationship changed"
        );

        let mut enqueued = 0usize;
        if self.schedule(from_user, RebuildTrigger::RelationshipChange) {
            enqueued += 1;
        }
        if self.schedule(to_user, RebuildTrigger::RelationshipChange) {
            enqueued += 1;
        }

        let from_mutuals = self.graph.get_mutual_friends(from_user).await?;
        let to_mutuals = self.graph.get_mutual_friends(to_user).await?;

        let affected: Vec<Uuid> = from_mutuals
            .intersection(&to_mutuals)
            .filter(|id| **id != from_user && **id != to_user)
            .take(self.fanout_limit)
            .copied()
            .collect();

        for owner_id in affected {
            if self.schedule(owner_id, RebuildTrigger::RelationshipChange) {
                enqueued += 1;
            }
        }

        debug!(
            from_user = %from_user,
            to_user = %to_user,
            enqueued,
            "Relationship change fan-out complete"
        );
        Ok(())
    }
}

/// Spawn the rebuild worker pool over one shared queue.
pub fn spawn_rebuild_workers(
    builder: Arc<TopKBuilder>,
    tracker: RebuildTracker,
    receiver: JobReceiver,
    config: &JobsConfig,
) -> Vec<JoinHandle<()>> {
    let receiver: SharedJobReceiver = Arc::new(Mutex::new(receiver));

    (0..config.worker_count)
        .map(|worker_id| {
            spawn_rebuild_worker(
                worker_id,
                builder.clone(),
                tracker.clone(),
                receiver.clone(),
                config.clone(),
            )
        })
        .collect()
}

fn spawn_rebuild_worker(
    worker_id: usize,
    builder: Arc<TopKBuilder>,
    tracker: RebuildTracker,
    receiver: SharedJobReceiver,
    config: JobsConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(worker_id, "Rebuild worker started");

        loop {
            let job = {
                let mut rx = receiver.lock().await;
                rx.recv().await
            };
            let Some(job) = job else {
                break;
            };

            if !tracker.begin(job.owner_id) {
                debug!(owner_id = %job.owner_id, "Rebuild superseded, skipping");
                continue;
            }

            run_with_retry(&builder, &job, &config).await;
            tracker.finish(job.owner_id);
        }

        info!(worker_id, "Rebuild worker stopped (queue closed)");
    })
}

/// Execute one job, retrying transient store failures with exponential
/// backoff. Exhaustion drops the job; the owner's previously persisted set
/// stays intact.
async fn run_with_retry(builder: &TopKBuilder, job: &RebuildJob, config: &JobsConfig) {
    let trigger = job.trigger.as_str();
    let start = Instant::now();
    let mut attempts = job.attempt;

    loop {
        attempts += 1;

        match builder.rebuild(job.owner_id).await {
            Ok(outcome) => {
                let status = if outcome.skipped { "skipped" } else { "completed" };
                metrics::record_rebuild(trigger, status);
                metrics::observe_rebuild_duration(trigger, start.elapsed());
                return;
            }
            Err(e) if e.is_retryable() && attempts < config.max_attempts => {
                let backoff_ms = config.retry_backoff_ms * 2u64.pow(attempts.saturating_sub(1));
                warn!(
                    owner_id = %job.owner_id,
                    attempt = attempts,
                    max_attempts = config.max_attempts,
                    backoff_ms,
                    "Rebuild failed, retrying: {}",
                    e
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => {
                error!(
                    owner_id = %job.owner_id,
                    attempts,
                    "Rebuild failed permanently: {}",
                    e
                );
                metrics::record_rebuild(trigger, "failed");
                return;
            }
        }
    }
}

/// Spawn the periodic sweep that re-enqueues every active user.
pub fn spawn_periodic_sweep(
    scheduler: RebuildScheduler,
    graph: Arc<dyn GraphStore>,
    interval_sec: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_sec));
        info!(interval_sec, "Periodic rebuild sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_once(&scheduler, graph.as_ref()).await {
                        Ok((scanned, enqueued)) => {
                            info!(scanned, enqueued, "Periodic sweep complete");
                        }
                        Err(e) => {
                            error!("Periodic sweep failed, will retry on next tick: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Periodic rebuild sweep stopping");
                    break;
                }
            }
        }
    })
}

async fn sweep_once(
    scheduler: &RebuildScheduler,
    graph: &dyn GraphStore,
) -> Result<(usize, usize)> {
    let mut offset = 0i64;
    let mut scanned = 0usize;
    let mut enqueued = 0usize;

    loop {
        let ids = graph.list_user_ids(SWEEP_BATCH_SIZE, offset).await?;
        if ids.is_empty() {
            break;
        }
        scanned += ids.len();

        for owner_id in &ids {
            if scheduler.schedule(*owner_id, RebuildTrigger::Periodic) {
                enqueued += 1;
            }
        }

        if (ids.len() as i64) < SWEEP_BATCH_SIZE {
            break;
        }
        offset += SWEEP_BATCH_SIZE;
    }

    Ok((scanned, enqueued))
}
