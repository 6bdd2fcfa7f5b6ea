//! Prometheus metrics for the suggestion engine.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static REBUILDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "suggestion_rebuilds_total",
        "Total suggestion rebuilds by trigger and outcome",
        &["trigger", "status"]
    )
    .expect("Failed to register suggestion rebuilds metric")
});

static REBUILD_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "suggestion_rebuild_duration_seconds",
        "Duration of suggestion rebuilds",
        &["trigger"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register suggestion rebuild duration metric")
});

static REBUILDS_COLLAPSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "suggestion_rebuilds_collapsed_total",
        "Rebuild triggers collapsed because one was already queued or running"
    )
    .expect("Failed to register suggestion collapse metric")
});

static QUEUE_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "suggestion_queue_dropped_total",
        "Rebuild jobs dropped because the queue was full"
    )
    .expect("Failed to register suggestion queue drop metric")
});

static CACHE_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "suggestion_cache_requests_total",
        "Display-set cache lookups by result",
        &["result"]
    )
    .expect("Failed to register suggestion cache metric")
});

static CLEANUP_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "suggestion_cleanup_runs_total",
        "Total cleanup cycles (success/error)",
        &["status"]
    )
    .expect("Failed to register suggestion cleanup runs metric")
});

static CLEANUP_ROWS_DELETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "suggestion_cleanup_rows_deleted_total",
        "Suggestion rows removed by the cleanup job",
        &["category"]
    )
    .expect("Failed to register suggestion cleanup rows metric")
});

/// Record a rebuild outcome (status: completed/skipped/failed/timeout)
pub fn record_rebuild(trigger: &str, status: &str) {
    REBUILDS_TOTAL.with_label_values(&[trigger, status]).inc();
}

/// Record rebuild duration
pub fn observe_rebuild_duration(trigger: &str, duration: Duration) {
    REBUILD_DURATION_SECONDS
        .with_label_values(&[trigger])
        .observe(duration.as_secs_f64());
}

/// Record a trigger collapsed by per-user dedup
pub fn record_rebuild_collapsed() {
    REBUILDS_COLLAPSED_TOTAL.inc();
}

/// Record a job dropped on a full queue
pub fn record_queue_dropped() {
    QUEUE_DROPPED_TOTAL.inc();
}

/// Record a cache lookup result
pub fn record_cache_request(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_REQUESTS_TOTAL.with_label_values(&[result]).inc();
}

/// Record cleanup cycle result (success/error)
pub fn record_cleanup_run(status: &str) {
    CLEANUP_RUNS_TOTAL.with_label_values(&[status]).inc();
}

/// Record rows removed by cleanup (category: orphaned/stale)
pub fn record_cleanup_rows_deleted(category: &str, count: u64) {
    CLEANUP_ROWS_DELETED_TOTAL
        .with_label_values(&[category])
        .inc_by(count);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_does_not_panic() {
        record_rebuild("periodic", "success");
        observe_rebuild_duration("manual", Duration::from_millis(42));
        record_rebuild_collapsed();
        record_queue_dropped();
        record_cache_request(true);
        record_cache_request(false);
        record_cleanup_run("success");
        record_cleanup_rows_deleted("orphaned", 3);
    }
}
