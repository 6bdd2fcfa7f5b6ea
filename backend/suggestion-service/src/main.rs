use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use suggestion_service::cache::SuggestionCache;
use suggestion_service::config::Config;
use suggestion_service::handlers::{
    get_suggestions, refresh_suggestions, relationship_changed, SuggestionHandlerState,
};
use suggestion_service::jobs::{
    cleanup::spawn_cleanup_job, create_rebuild_queue, spawn_periodic_sweep, spawn_rebuild_workers,
    RebuildScheduler, RebuildTracker,
};
use suggestion_service::metrics::serve_metrics;
use suggestion_service::repository::{GraphStore, PgGraphStore, PgSuggestionStore, SuggestionStore};
use suggestion_service::services::SuggestionEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("🔧 Starting suggestion-service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "✅ Configuration loaded: env={}, http_port={}",
        config.app.env, config.app.http_port
    );

    // Initialize database pool with prepared statement caching disabled for PgBouncer compatibility
    let connect_options = PgConnectOptions::from_str(&config.database.url)
        .context("Failed to parse DATABASE_URL")?
        .statement_cache_capacity(0); // Disable prepared statement caching for PgBouncer transaction mode

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_sec))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    // Verify database connection
    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("✅ Database pool created and verified");

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("✅ Database migrations completed");

    // Initialize Redis-backed display cache
    let cache = SuggestionCache::new(&config.redis)
        .await
        .context("Failed to connect to Redis")?;
    cache.ping().await.context("Failed to ping Redis")?;
    info!("✅ Redis connection established");

    let graph: Arc<dyn GraphStore> = Arc::new(PgGraphStore::new(pg_pool.clone()));
    let suggestions: Arc<dyn SuggestionStore> = Arc::new(PgSuggestionStore::new(pg_pool.clone()));

    // Rebuild pipeline: deduped queue feeding a worker pool
    let tracker = RebuildTracker::new();
    let (sender, receiver) = create_rebuild_queue(config.jobs.queue_capacity);
    let scheduler = RebuildScheduler::new(
        tracker.clone(),
        sender,
        graph.clone(),
        config.jobs.fanout_limit,
    );

    let engine = Arc::new(SuggestionEngine::new(
        graph.clone(),
        suggestions.clone(),
        Some(Arc::new(cache)),
        scheduler.clone(),
        config.engine.clone(),
    ));
    info!("✅ Suggestion engine initialized");

    // Background jobs stop on the broadcast channel; the worker pool stops
    // when the queue senders are dropped.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let _workers = spawn_rebuild_workers(engine.builder(), tracker, receiver, &config.jobs);
    let _sweep = spawn_periodic_sweep(
        scheduler,
        graph.clone(),
        config.jobs.periodic_interval_sec,
        shutdown_tx.subscribe(),
    );
    let _cleanup = spawn_cleanup_job(
        suggestions.clone(),
        config.jobs.clone(),
        shutdown_tx.subscribe(),
    );
    info!(
        "✅ Background jobs started: {} rebuild workers, periodic sweep, cleanup",
        config.jobs.worker_count
    );

    let state = web::Data::new(SuggestionHandlerState {
        engine: engine.clone(),
        internal_service_token: config.app.internal_service_token.clone(),
    });

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    info!("🚀 suggestion-service listening on http://{}", http_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(get_suggestions)
            .service(refresh_suggestions)
            .service(relationship_changed)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")?;

    let _ = shutdown_tx.send(());
    info!("🛑 suggestion-service shutting down");
    Ok(())
}
